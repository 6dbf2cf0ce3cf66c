//! Port allocation for directory listeners.

use crate::error::Result;
use std::net::{IpAddr, TcpListener};

/// Find a port that is currently free on `bind_address`.
///
/// A transient listener is bound with an OS-assigned port and dropped right
/// away, so the port can be taken by someone else before the caller binds it.
/// Directory creation retries on that race.
pub fn get_available_port(bind_address: IpAddr) -> Result<u16> {
    let listener = TcpListener::bind((bind_address, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    #[test]
    fn test_port_is_bindable() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let port = get_available_port(addr).expect("allocate");
        assert_ne!(port, 0);
        // Nothing holds the port once the allocator returns.
        let listener = TcpListener::bind((addr, port)).expect("rebind");
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_held_ports_are_not_reissued() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut held = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let port = get_available_port(addr).expect("allocate");
            held.push(TcpListener::bind((addr, port)).expect("bind"));
            assert!(seen.insert(port), "port {port} handed out twice");
        }
    }

    #[test]
    fn test_unassignable_address_fails() {
        // TEST-NET-1 is never configured on a local interface.
        let addr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        assert!(get_available_port(addr).is_err());
    }
}
