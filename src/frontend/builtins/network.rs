use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{num_arg, str_arg};

fn parse_prefix(s: &str) -> Result<IpNet, String> {
    s.parse::<IpNet>()
        .map_err(|e| format!("invalid CIDR prefix {s:?}: {e}"))
}

fn address_bits(net: &IpNet) -> u8 {
    match net {
        IpNet::V4(_) => 32,
        IpNet::V6(_) => 128,
    }
}

fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(a) as u128,
        IpAddr::V6(a) => u128::from(a),
    }
}

fn from_u128(net: &IpNet, n: u128) -> IpAddr {
    match net {
        IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(n as u32)),
        IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(n)),
    }
}

/// Carve subnet `netnum` with `newbits` extra prefix bits out of `net`.
fn subnet(net: &IpNet, newbits: u8, netnum: u128) -> Result<IpNet, String> {
    let new_len = net.prefix_len() as u32 + newbits as u32;
    let max = address_bits(net) as u32;
    if new_len > max {
        return Err(format!(
            "insufficient address space to extend prefix of {} by {newbits}",
            net.prefix_len()
        ));
    }
    if newbits < 128 && netnum >> newbits != 0 {
        return Err(format!("netnum {netnum} does not fit in {newbits} bits"));
    }
    let shift = max - new_len;
    let base = to_u128(net.network());
    let offset = if shift >= 128 { 0 } else { netnum << shift };
    let addr = from_u128(net, base | offset);
    let len = new_len as u8;
    match addr {
        IpAddr::V4(a) => Ipv4Net::new(a, len).map(IpNet::V4).map_err(|e| e.to_string()),
        IpAddr::V6(a) => Ipv6Net::new(a, len).map(IpNet::V6).map_err(|e| e.to_string()),
    }
}

/// `cidrsubnet(prefix, newbits, netnum)`
pub fn create_cidrsubnet_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let net = parse_prefix(str_arg(&args, 0)?)?;
            let newbits = num_arg(&args, 1)?;
            let netnum = num_arg(&args, 2)?;
            if newbits < 0.0 || netnum < 0.0 {
                return Err("newbits and netnum must not be negative".to_string());
            }
            subnet(&net, newbits as u8, netnum as u128).map(|n| Value::from(n.to_string()))
        })
}

/// `cidrsubnets(prefix, newbits...)` allocates consecutive subnets of the
/// given sizes.
pub fn create_cidrsubnets_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| {
            let net = parse_prefix(str_arg(&args, 0)?)?;
            let bits = address_bits(&net) as u32;
            let base = to_u128(net.network());
            let mut next = base;
            let mut out = Vec::new();
            for idx in 1..args.len() {
                let newbits = num_arg(&args, idx)?;
                if newbits < 1.0 {
                    return Err("each newbits value must be at least 1".to_string());
                }
                let len = net.prefix_len() as u32 + newbits as u32;
                if len > bits {
                    return Err(format!("not enough address space for /{len}"));
                }
                let size = 1u128.checked_shl(bits - len).unwrap_or(0);
                // align to the subnet size
                if size > 0 && (next - base) % size != 0 {
                    next += size - (next - base) % size;
                }
                let netnum = if size == 0 { 0 } else { (next - base) / size };
                let sub = subnet(&net, newbits as u8, netnum)?;
                out.push(Value::from(sub.to_string()));
                next += size.max(1);
            }
            Ok(Value::from(out))
        })
}

/// `cidrhost(prefix, hostnum)`; a negative host number counts back from
/// the end of the range.
pub fn create_cidrhost_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let net = parse_prefix(str_arg(&args, 0)?)?;
            let hostnum = num_arg(&args, 1)? as i128;
            let host_bits = (address_bits(&net) - net.prefix_len()) as u32;
            let size = 1i128.checked_shl(host_bits).unwrap_or(i128::MAX);
            let index = if hostnum < 0 { size + hostnum } else { hostnum };
            if index < 0 || index >= size {
                return Err(format!("prefix has no host number {hostnum}"));
            }
            let addr = from_u128(&net, to_u128(net.network()) + index as u128);
            Ok(Value::from(addr.to_string()))
        })
}

/// Dotted netmask of an IPv4 prefix.
pub fn create_cidrnetmask_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        match parse_prefix(str_arg(&args, 0)?)? {
            IpNet::V4(net) => Ok(Value::from(net.netmask().to_string())),
            IpNet::V6(_) => Err("cidrnetmask only supports IPv4 prefixes".to_string()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::eval_str;
    use hcl::Value;

    #[test]
    fn test_cidrsubnet() {
        assert_eq!(
            eval_str("cidrsubnet(\"10.0.0.0/16\", 8, 2)").unwrap(),
            Value::from("10.0.2.0/24")
        );
        assert_eq!(
            eval_str("cidrsubnet(\"172.16.0.0/12\", 4, 15)").unwrap(),
            Value::from("172.31.0.0/16")
        );
        assert_eq!(
            eval_str("cidrsubnet(\"fd00:fd12:3456:7890::/56\", 16, 162)").unwrap(),
            Value::from("fd00:fd12:3456:7800:a200::/72")
        );
        assert!(eval_str("cidrsubnet(\"10.0.0.0/16\", 2, 4)").is_err());
        assert!(eval_str("cidrsubnet(\"10.0.0.0/30\", 8, 0)").is_err());
    }

    #[test]
    fn test_cidrhost_and_netmask() {
        assert_eq!(eval_str("cidrhost(\"10.12.112.0/20\", 16)").unwrap(), Value::from("10.12.112.16"));
        assert_eq!(eval_str("cidrhost(\"10.12.112.0/20\", -1)").unwrap(), Value::from("10.12.127.255"));
        assert!(eval_str("cidrhost(\"10.0.0.0/30\", 4)").is_err());
        assert_eq!(eval_str("cidrnetmask(\"172.16.0.0/12\")").unwrap(), Value::from("255.240.0.0"));
    }

    #[test]
    fn test_cidrsubnets_are_consecutive() {
        assert_eq!(
            eval_str("cidrsubnets(\"10.1.0.0/16\", 4, 4, 8, 4)").unwrap(),
            Value::from(vec![
                Value::from("10.1.0.0/20"),
                Value::from("10.1.16.0/20"),
                Value::from("10.1.32.0/24"),
                Value::from("10.1.48.0/20"),
            ])
        );
    }
}
