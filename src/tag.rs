/// Frame types understood by the session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameTag {
    /// Input weights, `neurons x inputs`.
    WeightsIn,
    /// Reservoir weights, `neurons x neurons`.
    WeightsRes,
    /// Readout weights, `outputs x (neurons + inputs)`.
    WeightsOut,
    /// Input samples, `N x inputs`.
    DataIn,
    /// Ground-truth targets, `N x outputs`.
    DataOut,
}

impl FrameTag {
    pub const ALL: [FrameTag; 5] = [
        FrameTag::WeightsIn,
        FrameTag::WeightsRes,
        FrameTag::WeightsOut,
        FrameTag::DataIn,
        FrameTag::DataOut,
    ];

    /// Canonical 8-byte wire identifier, right-padded with `_`.
    pub fn wire_id(self) -> &'static [u8; 8] {
        match self {
            FrameTag::WeightsIn => b"WIN_____",
            FrameTag::WeightsRes => b"WX______",
            FrameTag::WeightsOut => b"WOUT____",
            FrameTag::DataIn => b"DATAIN__",
            FrameTag::DataOut => b"DATAOUT_",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameTag::WeightsIn => "WIN",
            FrameTag::WeightsRes => "WX",
            FrameTag::WeightsOut => "WOUT",
            FrameTag::DataIn => "DATAIN",
            FrameTag::DataOut => "DATAOUT",
        }
    }

    /// Match a raw header tag.
    ///
    /// Space, CR, LF and NUL are trimmed from both ends; what remains must
    /// be a full `_`-padded wire id, compared case-sensitively.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        let id = trim_tag(raw);
        FrameTag::ALL
            .into_iter()
            .find(|tag| tag.wire_id().as_slice() == id)
    }
}

/// Strip transport noise around a raw tag.
pub fn trim_tag(raw: &[u8]) -> &[u8] {
    let noise = |b: &u8| matches!(b, b' ' | b'\n' | b'\r' | 0);
    let start = raw.iter().position(|b| !noise(b)).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| !noise(b)).map_or(start, |i| i + 1);
    &raw[start..end]
}
