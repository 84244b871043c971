//! Time-windowed aggregation for the `summarize` stage.
//!
//! # Windows
//!
//! With a `bin(Time, span)` dimension the operator keeps one open window.
//! The first record anchors it: its time is truncated to the span's smallest
//! non-zero calendar unit (second, minute, hour or day) and the window closes
//! one span later, at the flush target. A record whose time reaches the flush
//! target closes the window: every cell is emitted, the index is cleared and
//! the target advances by whole spans until it lies past the record's time.
//! Windows skipped that way emit nothing. The record is then folded into the
//! new window.
//!
//! Without a time bin the operator accumulates until completion.
//!
//! # Cells
//!
//! Cells are keyed by the rendered values of the non-time group-by
//! expressions. A new cell is seeded with the window start, the group values
//! and each aggregation's default value; cells are emitted in creation order.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;

use kql_parser::{BinSpec, NamedExpr, Record, Summarize, Value};

use crate::aggregation::AggregationSpec;
use crate::error::{EvalError, Result};
use crate::evaluator::Evaluator;
use crate::functions::datetime::{epoch_nanos, floor_datetime, from_epoch_nanos};
use crate::operators::to_datetime;

/// Composite key of one aggregation cell: the group-by values, rendered.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    pub fn from_values(values: &[Value]) -> Self {
        GroupKey(values.iter().map(Value::to_string).collect())
    }
}

/// Aggregation cells of the open window, in creation order.
#[derive(Debug, Default)]
pub struct DimensionIndex {
    cells: IndexMap<GroupKey, Record>,
}

impl DimensionIndex {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&Record> {
        self.cells.get(key)
    }

    /// Look up a cell, creating it with `seed` when absent.
    pub fn get_or_insert_with(&mut self, key: GroupKey, seed: impl FnOnce() -> Record) -> &mut Record {
        self.cells.entry(key).or_insert_with(seed)
    }

    /// Remove and return every cell.
    pub fn drain(&mut self) -> Vec<Record> {
        self.cells.drain(..).map(|(_, cell)| cell).collect()
    }
}

#[derive(Debug)]
pub struct SummarizeOperator {
    aggregations: Vec<AggregationSpec>,
    group_by: Vec<NamedExpr>,
    bin: Option<BinSpec>,
    flush_target: Option<DateTime<Utc>>,
    index: DimensionIndex,
}

impl SummarizeOperator {
    /// Compile a parsed `summarize`. Unknown aggregations fail here.
    pub fn new(summarize: &Summarize) -> Result<Self> {
        let aggregations = summarize
            .aggregations
            .iter()
            .map(AggregationSpec::compile)
            .collect::<Result<Vec<_>>>()?;
        let bad_duration = summarize
            .bin
            .as_ref()
            .filter(|bin| bin.duration <= TimeDelta::zero() || bin.duration.num_nanoseconds().is_none());
        if let Some(bin) = bad_duration {
            return Err(EvalError::InvalidArgument(format!(
                "bin duration must be positive and under 292 years, got {}",
                kql_parser::format_timespan(bin.duration)
            )));
        }

        Ok(SummarizeOperator {
            aggregations,
            group_by: summarize.group_by.clone(),
            bin: summarize.bin.clone(),
            flush_target: None,
            index: DimensionIndex::default(),
        })
    }

    /// The time at which the open window closes, if one is open.
    pub fn flush_target(&self) -> Option<DateTime<Utc>> {
        self.flush_target
    }

    pub fn cell_count(&self) -> usize {
        self.index.len()
    }

    /// Fold one record in, returning the cells of any window it closed.
    ///
    /// Every expression is evaluated and every aggregation input checked
    /// before state changes, so a failing record leaves the window intact.
    pub fn on_next(&mut self, record: &Record, evaluator: &Evaluator) -> Result<Vec<Record>> {
        let time = match &self.bin {
            Some(bin) => Some(event_time(bin, record, evaluator)?),
            None => None,
        };
        let group_values = self
            .group_by
            .iter()
            .map(|group| evaluator.eval(&group.expr, record))
            .collect::<Result<Vec<_>>>()?;
        let mut inputs = Vec::with_capacity(self.aggregations.len());
        for spec in &self.aggregations {
            let input = match &spec.arg {
                Some(arg) => evaluator.eval(arg, record)?,
                None => Value::Null,
            };
            spec.check(&input)?;
            inputs.push(input);
        }

        let mut flushed = Vec::new();
        if let (Some(bin), Some(time)) = (&self.bin, time) {
            match self.flush_target {
                None => {
                    self.flush_target =
                        Some(first_flush_target(time, bin.duration).ok_or_else(window_overflow)?);
                }
                Some(target) if time >= target => {
                    let next =
                        next_flush_target(target, time, bin.duration).ok_or_else(window_overflow)?;
                    flushed = self.index.drain();
                    self.flush_target = Some(next);
                }
                Some(_) => {}
            }
        }

        let window_start = match (&self.bin, self.flush_target) {
            (Some(bin), Some(target)) => Some((bin.name.as_str(), target - bin.duration)),
            _ => None,
        };
        let key = GroupKey::from_values(&group_values);
        let aggregations = &self.aggregations;
        let group_by = &self.group_by;
        let cell = self.index.get_or_insert_with(key, || {
            let mut cell = Record::with_capacity(1 + group_by.len() + aggregations.len());
            if let Some((name, start)) = window_start {
                cell.insert(name.to_string(), Value::DateTime(start));
            }
            for (group, value) in group_by.iter().zip(&group_values) {
                cell.insert(group.name.clone(), value.clone());
            }
            for spec in aggregations {
                cell.insert(spec.name.clone(), spec.default_value());
            }
            cell
        });
        for (spec, input) in aggregations.iter().zip(inputs) {
            if let Some(acc) = cell.get_mut(&spec.name) {
                spec.add(input, acc);
            }
        }

        Ok(flushed)
    }

    /// Upstream completion: emit every cell regardless of the flush target.
    pub fn on_completed(&mut self) -> Vec<Record> {
        self.flush_target = None;
        self.index.drain()
    }
}

fn event_time(bin: &BinSpec, record: &Record, evaluator: &Evaluator) -> Result<DateTime<Utc>> {
    let value = evaluator.eval(&bin.source, record)?;
    to_datetime(&value).ok_or_else(|| {
        EvalError::mismatch(format!(
            "summarize time '{}' must be a datetime, got {} '{value}'",
            bin.source,
            value.type_name()
        ))
    })
}

/// The smallest calendar unit with a non-zero component in `duration`:
/// 90s truncates to the second, 5m to the minute, 2h to the hour, 1d to the
/// day. Sub-second durations are not truncated.
fn truncation_unit(duration: TimeDelta) -> Option<TimeDelta> {
    let secs = duration.num_seconds();
    if secs % 60 != 0 {
        Some(TimeDelta::seconds(1))
    } else if (secs / 60) % 60 != 0 {
        Some(TimeDelta::minutes(1))
    } else if (secs / 3_600) % 24 != 0 {
        Some(TimeDelta::hours(1))
    } else if secs >= 86_400 {
        Some(TimeDelta::days(1))
    } else {
        None
    }
}

fn first_flush_target(time: DateTime<Utc>, duration: TimeDelta) -> Option<DateTime<Utc>> {
    let anchor = truncation_unit(duration)
        .and_then(|unit| floor_datetime(time, unit))
        .unwrap_or(time);
    anchor.checked_add_signed(duration)
}

/// The first target past `time`, a whole number of spans after `target`.
/// Requires `time >= target`.
fn next_flush_target(
    target: DateTime<Utc>,
    time: DateTime<Utc>,
    duration: TimeDelta,
) -> Option<DateTime<Utc>> {
    let step = i128::from(duration.num_nanoseconds()?);
    let target = epoch_nanos(target);
    let spans = (epoch_nanos(time) - target).div_euclid(step) + 1;
    from_epoch_nanos(target + spans * step)
}

fn window_overflow() -> EvalError {
    EvalError::InvalidArgument("summarize window end is out of the datetime range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use kql_parser::{Stage, parse_query};

    use crate::registry::FunctionRegistry;

    fn operator(text: &str) -> SummarizeOperator {
        let query = parse_query(text).unwrap();
        let Stage::Summarize(summarize) = &query.stages[0] else {
            panic!("expected summarize");
        };
        SummarizeOperator::new(summarize).unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(FunctionRegistry::new()))
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, h, m, s).unwrap()
    }

    fn event(time: DateTime<Utc>, user: &str) -> Record {
        let mut r = Record::new();
        r.insert("Time".into(), Value::DateTime(time));
        r.insert("User".into(), Value::from(user));
        r
    }

    #[test]
    fn test_truncation_unit() {
        assert_eq!(truncation_unit(TimeDelta::seconds(90)), Some(TimeDelta::seconds(1)));
        assert_eq!(truncation_unit(TimeDelta::minutes(5)), Some(TimeDelta::minutes(1)));
        assert_eq!(truncation_unit(TimeDelta::hours(2)), Some(TimeDelta::hours(1)));
        assert_eq!(truncation_unit(TimeDelta::days(1)), Some(TimeDelta::days(1)));
        assert_eq!(truncation_unit(TimeDelta::milliseconds(500)), None);
    }

    #[test]
    fn test_first_flush_target_is_wall_clock_aligned() {
        assert_eq!(first_flush_target(at(10, 7, 42), TimeDelta::minutes(5)), Some(at(10, 12, 0)));
        assert_eq!(first_flush_target(at(10, 7, 42), TimeDelta::hours(1)), Some(at(11, 0, 0)));
        assert_eq!(first_flush_target(DateTime::<Utc>::MAX_UTC, TimeDelta::minutes(1)), None);
    }

    #[test]
    fn test_next_flush_target_skips_whole_spans() {
        let minute = TimeDelta::minutes(1);
        assert_eq!(next_flush_target(at(10, 1, 0), at(10, 1, 0), minute), Some(at(10, 2, 0)));
        assert_eq!(next_flush_target(at(10, 1, 0), at(10, 5, 30), minute), Some(at(10, 6, 0)));

        let tick = TimeDelta::nanoseconds(100);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2120, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_flush_target(start, later, tick), Some(later + tick));
    }

    #[test]
    fn test_window_flush_on_crossing() {
        let mut op = operator("T | summarize count() by bin(Time, 1m)");
        let ev = evaluator();
        for s in [0, 10, 59] {
            assert!(op.on_next(&event(at(10, 0, s), "a"), &ev).unwrap().is_empty());
        }
        assert_eq!(op.flush_target(), Some(at(10, 1, 0)));

        let out = op.on_next(&event(at(10, 1, 0), "a"), &ev).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["count"], Value::Long(3));
        assert_eq!(out[0]["Time"], Value::DateTime(at(10, 0, 0)));
        assert_eq!(op.flush_target(), Some(at(10, 2, 0)));

        let rest = op.on_completed();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["count"], Value::Long(1));
        assert_eq!(rest[0]["Time"], Value::DateTime(at(10, 1, 0)));
    }

    #[test]
    fn test_window_past_datetime_range_is_an_error() {
        let mut op = operator("T | summarize count() by bin(Time, 1d)");
        let ev = evaluator();
        let err = op
            .on_next(&event(DateTime::<Utc>::MAX_UTC, "a"), &ev)
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
        assert_eq!(op.flush_target(), None);
        assert_eq!(op.cell_count(), 0);
    }

    #[test]
    fn test_skipped_windows_emit_nothing() {
        let mut op = operator("T | summarize count() by bin(Time, 1m)");
        let ev = evaluator();
        op.on_next(&event(at(10, 0, 5), "a"), &ev).unwrap();
        let out = op.on_next(&event(at(10, 5, 30), "a"), &ev).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(op.flush_target(), Some(at(10, 6, 0)));
        let rest = op.on_completed();
        assert_eq!(rest[0]["Time"], Value::DateTime(at(10, 5, 0)));
    }

    #[test]
    fn test_groups_in_insertion_order() {
        let mut op = operator("T | summarize n = count(), s = make_set(User) by User");
        let ev = evaluator();
        for user in ["b", "a", "b", "c", "a", "b"] {
            assert!(op.on_next(&event(at(10, 0, 0), user), &ev).unwrap().is_empty());
        }
        let out = op.on_completed();
        let users: Vec<_> = out.iter().map(|r| r["User"].to_string()).collect();
        assert_eq!(users, vec!["b", "a", "c"]);
        assert_eq!(out[0]["n"], Value::Long(3));
        assert_eq!(out[0]["s"], Value::List(vec![Value::from("b")]));
    }

    #[test]
    fn test_string_time_is_parsed() {
        let mut op = operator("T | summarize count() by bin(Time, 1h)");
        let mut r = Record::new();
        r.insert("Time".into(), Value::from("2021-06-01T10:30:00Z"));
        op.on_next(&r, &evaluator()).unwrap();
        assert_eq!(op.flush_target(), Some(at(11, 0, 0)));
    }

    #[test]
    fn test_bad_time_leaves_state_untouched() {
        let mut op = operator("T | summarize count() by bin(Time, 1h)");
        let ev = evaluator();
        op.on_next(&event(at(10, 0, 0), "a"), &ev).unwrap();

        let mut bad = Record::new();
        bad.insert("Time".into(), Value::from("yesterday-ish"));
        let err = op.on_next(&bad, &ev).unwrap_err();
        assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)));
        assert_eq!(op.cell_count(), 1);
    }

    #[test]
    fn test_bad_aggregation_input_fails_record_only() {
        let mut op = operator("T | summarize total = sum(User)");
        let ev = evaluator();
        let err = op.on_next(&event(at(10, 0, 0), "a"), &ev).unwrap_err();
        assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)));
        assert_eq!(op.cell_count(), 0);
    }

    #[test]
    fn test_dimension_index() {
        let mut index = DimensionIndex::default();
        let key = GroupKey::from_values(&[Value::from("a"), Value::Long(1)]);
        index.get_or_insert_with(key.clone(), Record::new);
        index
            .get_or_insert_with(key.clone(), || panic!("must reuse the cell"))
            .insert("x".into(), Value::Long(1));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&key).unwrap()["x"], Value::Long(1));
        assert_eq!(index.drain().len(), 1);
        assert!(index.is_empty());
    }
}
