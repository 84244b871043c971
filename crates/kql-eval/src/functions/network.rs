//! IPv4 helpers: conversion to and from 32-bit integers, subnet and range
//! membership.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use kql_parser::Value;

use super::{expect_args, int_arg};
use crate::error::{EvalError, Result};

fn parse_addr(function: &str, value: &Value) -> Result<Ipv4Addr> {
    let text = value.to_string();
    text.trim().parse::<Ipv4Addr>().map_err(|_| {
        EvalError::InvalidArgument(format!("{function}: '{text}' is not an IPv4 address"))
    })
}

/// `parse_ipv4(text)`: the address as a long. Accepts a CIDR suffix, which
/// masks the host bits. Unparseable input yields null.
pub fn parse_ipv4(args: &[Value]) -> Result<Value> {
    expect_args("parse_ipv4", args, 1, 1)?;
    let text = args[0].to_string();
    let text = text.trim().trim_matches(|c| c == '"' || c == '\'');

    let number = if text.contains('/') {
        text.parse::<Ipv4Net>()
            .ok()
            .map(|net| u32::from(net.network()))
    } else {
        text.parse::<Ipv4Addr>().ok().map(u32::from)
    };
    Ok(number.map_or(Value::Null, |n| Value::Long(i64::from(n))))
}

/// `ipv4_fromnumber(n)`: dotted-quad text for a 32-bit number.
pub fn ipv4_fromnumber(args: &[Value]) -> Result<Value> {
    expect_args("ipv4_fromnumber", args, 1, 1)?;
    if args[0].is_empty_like() {
        return Ok(Value::from(""));
    }
    let number = int_arg("ipv4_fromnumber", &args[0])?;
    let number = u32::try_from(number).map_err(|_| {
        EvalError::InvalidArgument(format!(
            "ipv4_fromnumber: {number} is outside the IPv4 range"
        ))
    })?;
    Ok(Value::Str(Ipv4Addr::from(number).to_string()))
}

/// `InSubnet(address, cidr)`
pub fn in_subnet(args: &[Value]) -> Result<Value> {
    expect_args("InSubnet", args, 2, 2)?;
    let addr = parse_addr("InSubnet", &args[0])?;
    let cidr = args[1].to_string();
    let net: Ipv4Net = cidr.trim().parse().map_err(|_| {
        EvalError::InvalidArgument(format!("InSubnet: '{cidr}' is not an IPv4 CIDR"))
    })?;
    Ok(Value::Bool(net.contains(&addr)))
}

/// `IpAddressInRange(address, first, last)`, inclusive.
pub fn ip_address_in_range(args: &[Value]) -> Result<Value> {
    expect_args("IpAddressInRange", args, 3, 3)?;
    let addr = parse_addr("IpAddressInRange", &args[0])?;
    let first = parse_addr("IpAddressInRange", &args[1])?;
    let last = parse_addr("IpAddressInRange", &args[2])?;
    Ok(Value::Bool(first <= addr && addr <= last))
}
