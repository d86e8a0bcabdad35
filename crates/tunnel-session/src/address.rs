//! In-tunnel address allocation
//!
//! Clients lease addresses from the server's in-tunnel prefix. The
//! network and broadcast addresses and the server's own address are
//! never leased.

use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// First assignable address not in `leased`
pub fn allocate(network: Ipv4Network, leased: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let server = network.ip();
    let base = network.network();
    let broadcast = network.broadcast();
    network
        .iter()
        .filter(|&addr| addr != base && addr != broadcast && addr != server)
        .find(|addr| !leased.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_reserved_addresses() {
        let network: Ipv4Network = "10.8.0.1/29".parse().unwrap();
        let first = allocate(network, &HashSet::new()).unwrap();
        assert_eq!(first, "10.8.0.2".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_skips_leased_addresses() {
        let network: Ipv4Network = "10.8.0.1/29".parse().unwrap();
        let leased: HashSet<Ipv4Addr> = ["10.8.0.2", "10.8.0.3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(
            allocate(network, &leased).unwrap(),
            "10.8.0.4".parse::<Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn test_exhaustion() {
        // /30 leaves exactly one assignable address next to the server.
        let network: Ipv4Network = "10.8.0.1/30".parse().unwrap();
        let first = allocate(network, &HashSet::new()).unwrap();
        assert_eq!(first, "10.8.0.2".parse::<Ipv4Addr>().unwrap());

        let leased: HashSet<Ipv4Addr> = [first].into_iter().collect();
        assert!(allocate(network, &leased).is_none());
    }

    #[test]
    fn test_addresses_return_to_the_pool() {
        let network: Ipv4Network = "10.8.0.1/30".parse().unwrap();
        let addr = allocate(network, &HashSet::new()).unwrap();
        let mut leased: HashSet<Ipv4Addr> = [addr].into_iter().collect();
        leased.remove(&addr);
        assert_eq!(allocate(network, &leased), Some(addr));
    }
}
