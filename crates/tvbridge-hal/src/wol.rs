//! Wake-on-LAN.  A webOS TV that is in standby has no SSAP socket open, so
//! the only way to turn it on is a magic packet addressed to its MAC.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;
use tvbridge_types::BridgeError;

const WOL_PORT: u16 = 9;

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Parse `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF` (case-insensitive).
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let invalid = || BridgeError::Config(format!("invalid MAC address {text:?}"));
        let mut bytes = [0u8; 6];
        let mut parts = text.trim().split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }

    /// Six `0xFF` bytes followed by the address repeated sixteen times.
    pub fn magic_packet(&self) -> [u8; 102] {
        let mut packet = [0xFFu8; 102];
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.0);
        }
        packet
    }
}

/// Broadcast a magic packet for `mac` on the local network.
pub async fn wake(mac: MacAddress) -> Result<(), BridgeError> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .map_err(|e| BridgeError::Session(format!("wake-on-lan bind failed: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| BridgeError::Session(format!("wake-on-lan broadcast flag: {e}")))?;
    socket
        .send_to(&mac.magic_packet(), SocketAddr::from((Ipv4Addr::BROADCAST, WOL_PORT)))
        .await
        .map_err(|e| BridgeError::Session(format!("wake-on-lan send failed: {e}")))?;
    debug!(?mac, "magic packet sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_and_dash_separated_addresses() {
        let a = MacAddress::parse("AA:bb:0C:dd:ee:01").unwrap();
        let b = MacAddress::parse("aa-BB-0c-DD-EE-01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.0, [0xAA, 0xBB, 0x0C, 0xDD, 0xEE, 0x01]);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA:BB:CC:DD:EE:GG",
            "AAB:B:CC:DD:EE:FF",
        ] {
            assert!(
                matches!(MacAddress::parse(bad), Err(BridgeError::Config(_))),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn magic_packet_layout() {
        let mac = MacAddress::parse("01:02:03:04:05:06").unwrap();
        let packet = mac.magic_packet();
        assert!(packet[..6].iter().all(|&b| b == 0xFF));
        for repeat in packet[6..].chunks(6) {
            assert_eq!(repeat, &[1, 2, 3, 4, 5, 6]);
        }
        assert_eq!(packet[6..].chunks(6).count(), 16);
    }
}
