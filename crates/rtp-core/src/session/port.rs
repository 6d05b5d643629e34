//! Local port allocation for RTP/RTCP socket pairs
//!
//! RTP gets an even port from the configured range; RTCP takes the odd
//! port above it unless RTCP is multiplexed onto the RTP socket.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use super::RtpSessionConfig;
use crate::{Error, Result};

/// Bind an RTP socket (and an RTCP companion unless muxed) from the range
pub(super) async fn bind_pair(
    config: &RtpSessionConfig,
) -> Result<(UdpSocket, Option<UdpSocket>)> {
    let min = match config.port_min.checked_add(config.port_min % 2) {
        Some(p) => p,
        None => {
            return Err(Error::NoPortAvailable {
                min: config.port_min,
                max: config.port_max,
            })
        }
    };
    let max = config.port_max;

    let mut port = min;
    while port <= max && port >= min {
        let rtp_addr = SocketAddr::new(config.local_ip, port);

        match UdpSocket::bind(rtp_addr).await {
            Ok(rtp_socket) => {
                if config.rtcp_mux || !config.rtcp_enabled {
                    return Ok((rtp_socket, None));
                }

                let rtcp_addr = SocketAddr::new(config.local_ip, port + 1);
                match UdpSocket::bind(rtcp_addr).await {
                    Ok(rtcp_socket) => return Ok((rtp_socket, Some(rtcp_socket))),
                    Err(e) => {
                        debug!(port = port + 1, "RTCP port busy: {}", e);
                        // both ports must come from one pair; try the next
                    }
                }
            }
            Err(e) => {
                debug!(port, "RTP port busy: {}", e);
            }
        }

        port = match port.checked_add(2) {
            Some(p) => p,
            None => break,
        };
    }

    Err(Error::NoPortAvailable { min, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn config(min: u16, max: u16, mux: bool) -> RtpSessionConfig {
        RtpSessionConfig {
            local_ip: IpAddr::from([127, 0, 0, 1]),
            port_min: min,
            port_max: max,
            rtcp_mux: mux,
            rtcp_enabled: true,
        }
    }

    #[tokio::test]
    async fn test_allocates_even_odd_pair() {
        let (rtp, rtcp) = bind_pair(&config(31_000, 31_100, false)).await.unwrap();
        let rtp_port = rtp.local_addr().unwrap().port();
        let rtcp_port = rtcp.unwrap().local_addr().unwrap().port();
        assert_eq!(rtp_port % 2, 0);
        assert_eq!(rtcp_port, rtp_port + 1);
    }

    #[tokio::test]
    async fn test_mux_allocates_single_socket() {
        let (_rtp, rtcp) = bind_pair(&config(31_200, 31_300, true)).await.unwrap();
        assert!(rtcp.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_range_fails() {
        // occupy the only candidate pair
        let (_a, _b) = bind_pair(&config(31_400, 31_401, false)).await.unwrap();
        let err = bind_pair(&config(31_400, 31_401, false)).await;
        assert!(matches!(err, Err(Error::NoPortAvailable { .. })));
    }

    #[tokio::test]
    async fn test_skips_busy_pair() {
        let (first, _rtcp) = bind_pair(&config(31_500, 31_510, false)).await.unwrap();
        let first_port = first.local_addr().unwrap().port();

        let (second, _rtcp) = bind_pair(&config(31_500, 31_510, false)).await.unwrap();
        assert!(second.local_addr().unwrap().port() > first_port);
    }
}
