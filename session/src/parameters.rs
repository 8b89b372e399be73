use serde::{Deserialize, Serialize};

use rtp::extension::ExtensionMap;

use crate::error::{Error, Result};

/// RTP profile negotiated for the session. Secure variants are recognized
/// here; key management itself is delegated to the caller.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    #[default]
    #[serde(rename = "AVP")]
    Avp,
    #[serde(rename = "AVPF")]
    Avpf,
    #[serde(rename = "SAVP")]
    Savp,
    #[serde(rename = "SAVPF")]
    Savpf,
}

impl Profile {
    pub fn is_feedback(&self) -> bool {
        matches!(self, Profile::Avpf | Profile::Savpf)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Profile::Savp | Profile::Savpf)
    }

    /// Promotes a plain profile to its feedback variant.
    fn promoted(self) -> Profile {
        match self {
            Profile::Avp => Profile::Avpf,
            Profile::Savp => Profile::Savpf,
            p => p,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

/// Feedback messages negotiated in the session description. Only `nack`
/// drives the retransmission path; the congestion-control schemes are
/// recognized and carried opaquely.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackMessage {
    Nack,
    Ack,
    GoogRemb,
    Scream,
    Nada,
}

/// Extended-report attributes from the session description.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum XrAttribute {
    /// rcvr-rtt: publish receiver reference times; `sender` restricts the
    /// DLRR echo path to senders.
    RcvrRtt { sender: bool },
    /// all report blocks the stack supports
    All,
}

/// A finalized session-parameter record, produced by the negotiation layers
/// and only consumed here. Construction validates consistency; an invalid
/// record never reaches a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParameters {
    pub profile: Profile,
    pub media_type: MediaType,
    /// payload type on the wire → codec name, as negotiated
    pub payload_types: Vec<(u8, String)>,
    pub clock_rate: u32,
    pub mtu: usize,
    /// session bandwidth in kbit/s
    pub session_bandwidth_kbps: u32,
    pub reduced_size_rtcp: bool,
    pub rtcp_mux: bool,
    pub multipath: bool,
    pub feedback_messages: Vec<FeedbackMessage>,
    pub xr_attributes: Vec<XrAttribute>,
    #[serde(skip)]
    pub header_extensions: ExtensionMap,
    /// point-to-point sessions may use the relaxed initial interval
    pub point_to_point: bool,
}

impl Default for SessionParameters {
    fn default() -> Self {
        SessionParameters {
            profile: Profile::Avp,
            media_type: MediaType::Video,
            payload_types: vec![],
            clock_rate: 90_000,
            mtu: 1400,
            session_bandwidth_kbps: 512,
            reduced_size_rtcp: false,
            rtcp_mux: false,
            multipath: false,
            feedback_messages: vec![],
            xr_attributes: vec![],
            header_extensions: ExtensionMap::new(),
            point_to_point: true,
        }
    }
}

impl SessionParameters {
    /// Validates the record and applies the profile promotion: negotiating
    /// any feedback message upgrades AVP to AVPF (and SAVP to SAVPF).
    pub fn finalize(mut self) -> Result<SessionParameters> {
        if self.clock_rate == 0 {
            return Err(Error::ConfigurationFault("missing clock rate".into()));
        }
        if self.mtu < 64 {
            return Err(Error::ConfigurationFault(format!(
                "implausible mtu {}",
                self.mtu
            )));
        }
        if self.session_bandwidth_kbps == 0 {
            return Err(Error::ConfigurationFault(
                "missing session bandwidth".into(),
            ));
        }
        if self.payload_types.is_empty() {
            return Err(Error::ConfigurationFault("empty payload-type map".into()));
        }

        if !self.feedback_messages.is_empty() {
            self.profile = self.profile.promoted();
        }

        Ok(self)
    }

    pub fn is_feedback_profile(&self) -> bool {
        self.profile.is_feedback()
    }

    pub fn negotiated(&self, message: FeedbackMessage) -> bool {
        self.feedback_messages.contains(&message)
    }

    pub fn wants_receiver_rtt(&self) -> bool {
        self.xr_attributes
            .iter()
            .any(|a| matches!(a, XrAttribute::RcvrRtt { .. } | XrAttribute::All))
    }

    /// The 5% control-traffic share of the session bandwidth, in octets
    /// per second.
    pub fn rtcp_bandwidth_octets_per_sec(&self) -> f64 {
        // kbps → octets/s at the standard 5% fraction: 0.05 * 1000 / 8
        self.session_bandwidth_kbps as f64 * 6.25
    }

    /// Resolves a payload type number to its negotiated codec name.
    pub fn codec_name(&self, payload_type: u8) -> Option<&str> {
        self.payload_types
            .iter()
            .find(|(pt, _)| *pt == payload_type)
            .map(|(_, name)| name.as_str())
    }
}
