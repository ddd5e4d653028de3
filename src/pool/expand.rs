//! Range expansion for pool population.
//!
//! CIDR ranges are normalized to their network address before expansion, so
//! `10.3.0.24/24` produces `10.3.0.0` first.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Smallest range accepted without `allow_small`
const MIN_RANGE_SIZE: u64 = 4;

/// Parse `"min-max"` or a single ASN
pub fn expand_asn_range(range: &str) -> Result<Vec<u32>, String> {
    let range = range.trim();
    let (min, max) = match range.split_once('-') {
        Some((min, max)) => (parse_asn(min)?, parse_asn(max)?),
        None => {
            let asn = parse_asn(range)?;
            (asn, asn)
        }
    };

    if min > max {
        return Err(format!("ASN range {} has min greater than max", range));
    }
    Ok((min..=max).collect())
}

fn parse_asn(value: &str) -> Result<u32, String> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid ASN '{}': {}", value.trim(), e))
}

/// Every address of the network containing `cidr`, network address first
pub fn expand_ipv4_range(cidr: &str, allow_small: bool) -> Result<Vec<Ipv4Addr>, String> {
    let net: Ipv4Net = cidr
        .trim()
        .parse()
        .map_err(|e| format!("IP range {} is invalid: {}", cidr, e))?;
    let net = net.trunc();

    let first = u32::from(net.network());
    let last = u32::from(net.broadcast());
    let size = u64::from(last - first) + 1;

    if size < 2 {
        return Err(format!("IP range {} has no room for allocation", cidr));
    }
    if size < MIN_RANGE_SIZE && !allow_small {
        return Err(format!(
            "IP range {} holds {} addresses, at least {} are required",
            cidr, size, MIN_RANGE_SIZE
        ));
    }

    Ok((first..=last).map(Ipv4Addr::from).collect())
}

/// Adjacent pairs `(addr[2k], addr[2k+1])` of the expanded range
pub fn expand_ip_pairs(cidr: &str, allow_small: bool) -> Result<Vec<(Ipv4Addr, Ipv4Addr)>, String> {
    let addresses = expand_ipv4_range(cidr, allow_small)?;
    Ok(addresses
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asn_range() {
        assert_eq!(expand_asn_range("64512-64515").unwrap(), vec![64512, 64513, 64514, 64515]);
        assert_eq!(expand_asn_range(" 65000 ").unwrap(), vec![65000]);
        assert!(expand_asn_range("64515-64512").is_err());
        assert!(expand_asn_range("abc-64512").is_err());
    }

    #[test]
    fn test_ipv4_range_is_network_normalized() {
        let ips = expand_ipv4_range("10.3.0.24/24", false).unwrap();
        assert_eq!(ips.len(), 256);
        assert_eq!(ips[0], Ipv4Addr::new(10, 3, 0, 0));
        assert_eq!(ips[255], Ipv4Addr::new(10, 3, 0, 255));
    }

    #[test]
    fn test_small_ranges() {
        assert!(expand_ipv4_range("10.3.0.0/31", false).is_err());
        assert_eq!(expand_ipv4_range("10.3.0.0/31", true).unwrap().len(), 2);
        assert!(expand_ipv4_range("10.3.0.0/32", true).is_err());
        assert_eq!(expand_ipv4_range("10.3.0.0/30", false).unwrap().len(), 4);
    }

    #[test]
    fn test_bad_cidr() {
        assert!(expand_ipv4_range("10.3.0/24", false).is_err());
        assert!(expand_ipv4_range("10.3.0.0/33", false).is_err());
    }

    #[test]
    fn test_pairs_are_positional() {
        let pairs = expand_ip_pairs("10.3.0.24/30", false).unwrap();
        assert_eq!(
            pairs,
            vec![
                (Ipv4Addr::new(10, 3, 0, 24), Ipv4Addr::new(10, 3, 0, 25)),
                (Ipv4Addr::new(10, 3, 0, 26), Ipv4Addr::new(10, 3, 0, 27)),
            ]
        );
    }
}
