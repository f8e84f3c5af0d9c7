use crate::logger::log;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Clone)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    limit: usize,
}

impl CandidateBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// `false`, если буфер полон и кандидат отброшен
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.pending.len() >= self.limit {
            log(&format!(
                "Pending candidate buffer full ({}), dropping candidate",
                self.limit
            ));
            return false;
        }
        self.pending.push(candidate);
        true
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn summarize_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    log(&format!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    ));

    if summary.relay == 0 {
        log("WARNING: No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}

/// Переводит конфигурацию серверов в формат webrtc
pub fn rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::IceServerKind;

    #[test]
    fn buffer_respects_limit_and_drains_in_order() {
        let mut buf = CandidateBuffer::new(2);
        assert!(buf.push(IceCandidate::new("a")));
        assert!(buf.push(IceCandidate::new("b")));
        assert!(!buf.push(IceCandidate::new("c")));

        let drained: Vec<_> = buf.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn summary_counts_candidate_types() {
        let candidates = [
            IceCandidate::new("candidate:1 1 udp 2130706431 192.168.1.4 5000 typ host"),
            IceCandidate::new("candidate:2 1 udp 1694498815 203.0.113.7 5001 typ srflx raddr 0.0.0.0 rport 0"),
            IceCandidate::new("candidate:3 1 udp 16777215 198.51.100.2 3478 typ relay raddr 0.0.0.0 rport 0"),
            IceCandidate::new("candidate:4 1 udp 2130706431 10.0.0.9 5002 typ host"),
        ];
        assert_eq!(
            summarize_candidates(&candidates),
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[test]
    fn turn_credentials_are_carried() {
        let servers = vec![ServerConfig {
            id: "relay".into(),
            kind: IceServerKind::Turn,
            url: "relay.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        }];
        let rtc = rtc_ice_servers(&servers);
        assert_eq!(rtc[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(rtc[0].username, "user");
        assert_eq!(rtc[0].credential, "secret");
    }
}
