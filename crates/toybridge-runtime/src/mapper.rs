//! [`SignalMapper`] – from raw samples to quantized actuator commands.
//!
//! Each configured [`ChannelSpec`] binds one signal address to one
//! [`ToyChannel`] and carries the axis's static [`AxisScale`].  Mapping is a
//! pure function of the sample and that table:
//!
//! - continuous samples: `native = round_or_ceil(clamp(raw, 0, 1) * multiplier)`
//! - contact samples: `true` → `contact_intensity`, `false` → `0`
//!
//! # Example
//!
//! ```rust
//! use toybridge_runtime::mapper::{AxisScale, ChannelSpec, SignalMapper};
//! use toybridge_types::{Axis, Sample, ToyChannel};
//!
//! let mapper = SignalMapper::new(vec![ChannelSpec {
//!     channel: ToyChannel::new("Lush", Axis::Vibrate),
//!     address: "/avatar/parameters/Vibe".into(),
//!     scale: AxisScale::default_for(Axis::Vibrate),
//! }])
//! .unwrap();
//!
//! let mapped = mapper.map(&Sample::float("/avatar/parameters/Vibe", 0.5)).unwrap();
//! assert_eq!(mapped.native, 10);
//! assert!(mapper.map(&Sample::float("/avatar/parameters/Other", 0.5)).is_none());
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use toybridge_types::{Axis, BridgeError, Sample, SignalValue, ToyChannel};

/// Absorbs float error so that e.g. `(1/3) * 3` does not ceil up to 2.
const CEIL_TOLERANCE: f32 = 1e-4;

/// How a scaled value is turned into an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    #[default]
    Nearest,
    Ceil,
}

/// Static per-axis conversion into the actuator's native scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub multiplier: f32,
    pub rounding: Rounding,
    /// Native value sent for a `true` contact sample.
    pub contact_intensity: u32,
}

impl AxisScale {
    /// Default scale for `axis`: Vibrate and Rotate use a 0–20 scale with
    /// round-to-nearest, Pump a coarse 0–3 scale with ceiling.
    pub fn default_for(axis: Axis) -> Self {
        match axis {
            Axis::Vibrate | Axis::Rotate => Self {
                multiplier: 20.0,
                rounding: Rounding::Nearest,
                contact_intensity: 20,
            },
            Axis::Pump => Self {
                multiplier: 3.0,
                rounding: Rounding::Ceil,
                contact_intensity: 3,
            },
        }
    }

    /// Quantize a continuous value into the native scale.
    pub fn quantize(&self, raw: f32) -> u32 {
        if !raw.is_finite() {
            return 0;
        }
        let scaled = raw.clamp(0.0, 1.0) * self.multiplier;
        let native = match self.rounding {
            Rounding::Nearest => scaled.round(),
            // Any positive input keeps the actuator running at step 1.
            Rounding::Ceil if scaled > 0.0 => (scaled - CEIL_TOLERANCE).ceil().max(1.0),
            Rounding::Ceil => 0.0,
        };
        native.max(0.0) as u32
    }

    /// Convert any sample value into the native scale.
    pub fn convert(&self, value: SignalValue) -> u32 {
        match value {
            SignalValue::Float(raw) => self.quantize(raw),
            SignalValue::Bool(true) => self.contact_intensity,
            SignalValue::Bool(false) => 0,
        }
    }
}

/// One row of the static channel table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub channel: ToyChannel,
    /// Exact signal address that drives this channel.
    pub address: String,
    pub scale: AxisScale,
}

/// Result of mapping one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub channel: ToyChannel,
    pub native: u32,
}

/// Resolves sample addresses against the channel table.
#[derive(Debug, Clone)]
pub struct SignalMapper {
    specs: Vec<ChannelSpec>,
    by_address: HashMap<String, usize>,
}

impl SignalMapper {
    /// Build a mapper from the channel table.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if two rows share an address or a
    /// channel, or if a multiplier is not a positive finite number.
    pub fn new(specs: Vec<ChannelSpec>) -> Result<Self, BridgeError> {
        let mut by_address = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if !(spec.scale.multiplier.is_finite() && spec.scale.multiplier > 0.0) {
                return Err(BridgeError::Config(format!(
                    "channel {} has invalid multiplier {}",
                    spec.channel, spec.scale.multiplier
                )));
            }
            if specs[..i].iter().any(|s| s.channel == spec.channel) {
                return Err(BridgeError::Config(format!(
                    "channel {} is configured twice",
                    spec.channel
                )));
            }
            if by_address.insert(spec.address.clone(), i).is_some() {
                return Err(BridgeError::Config(format!(
                    "address {} drives more than one channel",
                    spec.address
                )));
            }
        }
        Ok(Self { specs, by_address })
    }

    /// Every configured channel, in table order.
    pub fn channels(&self) -> impl Iterator<Item = &ToyChannel> {
        self.specs.iter().map(|s| &s.channel)
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Map `sample` to at most one channel.  Unknown addresses yield `None`.
    pub fn map(&self, sample: &Sample) -> Option<Mapped> {
        let spec = &self.specs[*self.by_address.get(&sample.address)?];
        Some(Mapped {
            channel: spec.channel.clone(),
            native: spec.scale.convert(sample.value),
        })
    }
}
