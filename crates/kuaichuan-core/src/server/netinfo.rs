//! 本机可达地址枚举
//!
//! 列出局域网内可用于访问本服务的 IPv4/IPv6 地址，供客户端生成
//! 加入链接。IPv4 只取私网段并按常见家用网段优先排序。

use if_addrs::IfAddr;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::IpListResponse;

/// 枚举本机地址
pub fn enumerate() -> IpListResponse {
    let mut ipv4 = BTreeSet::new();
    let mut ipv6 = BTreeSet::new();

    let interfaces = match if_addrs::get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            log::warn!("Failed to enumerate interfaces: {}", e);
            return IpListResponse {
                ipv4_list: Vec::new(),
                ipv6_list: Vec::new(),
            };
        }
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        match iface.addr {
            IfAddr::V4(v4) => {
                if keep_v4(&v4.ip) {
                    ipv4.insert(v4.ip.to_string());
                }
            }
            IfAddr::V6(v6) => {
                if keep_v6(&v6.ip) {
                    ipv6.insert(v6.ip.to_string());
                }
            }
        }
    }

    let mut ipv4_list: Vec<String> = ipv4.into_iter().collect();
    ipv4_list.sort_by_key(|ip| v4_preference(ip));

    IpListResponse {
        ipv4_list,
        ipv6_list: ipv6.into_iter().collect(),
    }
}

fn keep_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private()
}

/// 保留除回环与链路本地外的 IPv6 地址 (含 ULA)
fn keep_v6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    // fe80::/10 链路本地地址对浏览器不可用
    (ip.segments()[0] & 0xffc0) != 0xfe80
}

/// 192.168 段最优先，其次 10.、172.
fn v4_preference(ip: &str) -> (u8, String) {
    let rank = if ip.starts_with("192.168") {
        0
    } else if ip.starts_with("10.") {
        1
    } else if ip.starts_with("172.") {
        2
    } else {
        3
    };
    (rank, ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_preference_order() {
        let mut ips = vec![
            "10.0.0.5".to_string(),
            "172.16.1.2".to_string(),
            "192.168.1.10".to_string(),
        ];
        ips.sort_by_key(|ip| v4_preference(ip));
        assert_eq!(ips[0], "192.168.1.10");
        assert_eq!(ips[1], "10.0.0.5");
        assert_eq!(ips[2], "172.16.1.2");
    }

    #[test]
    fn test_keep_v4_private_only() {
        assert!(keep_v4(&"192.168.1.1".parse().unwrap()));
        assert!(keep_v4(&"10.1.2.3".parse().unwrap()));
        assert!(!keep_v4(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_keep_v6_drops_link_local() {
        assert!(!keep_v6(&"fe80::1".parse().unwrap()));
        assert!(!keep_v6(&"::1".parse().unwrap()));
        assert!(keep_v6(&"fd00::1".parse().unwrap()));
        assert!(keep_v6(&"2001:db8::1".parse().unwrap()));
    }
}
