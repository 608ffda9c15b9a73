//! Masked-register protocol
//!
//! Reads a register from a list of boards, decodes it with a shared
//! [`RegisterLayout`], applies field updates and writes the re-encoded word
//! back. Each board's read-modify-write is independent:
//!
//! - there is no compare-and-swap, the last writer wins
//! - there is no cross-board atomicity, a failed board never rolls back the
//!   others and never stops them from being written
//! - pulses are three full writes (0, 1, 0) so edge-triggered logic sees both
//!   transitions

use corrctl_transport::{BoxedDevice, DeviceId, TransportError};
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bitfield::{DecodedRegister, FieldKind, FieldSpec, RegisterLayout, Value};
use crate::error::RegisterError;

/// Requested change to one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Assign a value
    Set(Value),
    /// Invert a flag
    Toggle,
    /// Strobe a flag 0 -> 1 -> 0 after the write
    Pulse,
}

/// Ordered set of field updates for one write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdates(Vec<(String, FieldUpdate)>);

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldUpdate::Set(value.into()))
    }

    pub fn toggle(self, field: impl Into<String>) -> Self {
        self.with(field, FieldUpdate::Toggle)
    }

    pub fn pulse(self, field: impl Into<String>) -> Self {
        self.with(field, FieldUpdate::Pulse)
    }

    pub fn with(mut self, field: impl Into<String>, update: FieldUpdate) -> Self {
        self.push(field, update);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, update: FieldUpdate) {
        self.0.push((field.into(), update));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldUpdate)> {
        self.0.iter().map(|(k, u)| (k.as_str(), *u))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FieldUpdate)> for FieldUpdates {
    fn from_iter<T: IntoIterator<Item = (S, FieldUpdate)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, u)| (k.into(), u)).collect())
    }
}

/// Register word before and after a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WrittenWord {
    pub before: u32,
    pub after: u32,
}

/// Which read-modify-write pass produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePass {
    /// Set and toggle updates
    Update,
    /// First pulse step, flags driven low
    PulseLow,
    /// Second pulse step, flags driven high
    PulseHigh,
    /// Last pulse step, flags back low
    PulseRestore,
}

impl WritePass {
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePass::Update => "update",
            WritePass::PulseLow => "pulse low",
            WritePass::PulseHigh => "pulse high",
            WritePass::PulseRestore => "pulse restore",
        }
    }

    fn pulse_level(&self) -> Option<bool> {
        match self {
            WritePass::Update => None,
            WritePass::PulseHigh => Some(true),
            WritePass::PulseLow | WritePass::PulseRestore => Some(false),
        }
    }
}

const PULSE_PASSES: [WritePass; 3] = [
    WritePass::PulseLow,
    WritePass::PulseHigh,
    WritePass::PulseRestore,
];

/// Result of writing one board in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub device: DeviceId,
    pub register: String,
    pub pass: WritePass,
    pub result: Result<WrittenWord, TransportError>,
}

/// Per-board results of every pass of one operation
///
/// Outcomes are grouped by pass in the order the passes ran, and within a
/// pass follow the device list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub outcomes: Vec<WriteOutcome>,
}

impl WriteReport {
    /// True when every write of every pass landed
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &WriteOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn successes(&self) -> impl Iterator<Item = &WriteOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Outcomes of one pass
    pub fn pass(&self, pass: WritePass) -> impl Iterator<Item = &WriteOutcome> {
        self.outcomes.iter().filter(move |o| o.pass == pass)
    }

    /// Boards named in the report, first appearance order
    pub fn devices(&self) -> Vec<&DeviceId> {
        let mut seen: Vec<&DeviceId> = Vec::new();
        for o in &self.outcomes {
            if !seen.contains(&&o.device) {
                seen.push(&o.device);
            }
        }
        seen
    }

    /// Boards with at least one failed write, first failure order
    pub fn failed_devices(&self) -> Vec<&DeviceId> {
        let mut seen: Vec<&DeviceId> = Vec::new();
        for o in self.failures() {
            if !seen.contains(&&o.device) {
                seen.push(&o.device);
            }
        }
        seen
    }

    fn into_result(self) -> Result<WriteReport, RegisterError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(RegisterError::PartialFailure(self))
        }
    }
}

/// Validated update bound to its field
type Planned<'l> = (&'l FieldSpec, FieldUpdate);

/// Validated split of a write request
struct WritePlan<'l> {
    direct: Vec<Planned<'l>>,
    pulses: Vec<&'l FieldSpec>,
}

/// One register, shared layout, many boards
pub struct MaskedRegister<'a> {
    devices: &'a [BoxedDevice],
    layout: &'a RegisterLayout,
    names: Vec<String>,
}

impl<'a> MaskedRegister<'a> {
    /// Bind a layout to a device list
    ///
    /// # Arguments
    /// * `devices` - Boards to operate on
    /// * `layout` - Layout shared by all boards
    /// * `names` - Per-board register names; defaults to the layout's name
    ///   for every board
    pub fn new(
        devices: &'a [BoxedDevice],
        layout: &'a RegisterLayout,
        names: Option<&[String]>,
    ) -> Result<Self, RegisterError> {
        let names = match names {
            Some(names) if names.len() != devices.len() => {
                return Err(RegisterError::Arity {
                    names: names.len(),
                    devices: devices.len(),
                });
            }
            Some(names) => names.to_vec(),
            None => vec![layout.name().to_string(); devices.len()],
        };

        Ok(Self {
            devices,
            layout,
            names,
        })
    }

    pub fn layout(&self) -> &RegisterLayout {
        self.layout
    }

    /// Register names, one per board
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn targets(&self) -> impl Iterator<Item = (&BoxedDevice, &str)> {
        self.devices
            .iter()
            .zip(self.names.iter().map(String::as_str))
    }

    /// Read and decode the register on every board
    ///
    /// The first transport failure is returned unchanged.
    pub async fn read_all(&self) -> Result<Vec<DecodedRegister>, RegisterError> {
        let reads = self.targets().map(|(device, name)| async move {
            let raw = device.read_uint(name).await?;
            let mut reg = self.layout.decode(raw);
            reg.register = name.to_string();
            reg.device = Some(device.id().clone());
            Ok::<_, TransportError>(reg)
        });

        Ok(try_join_all(reads).await?)
    }

    /// Apply field updates on every board
    ///
    /// Updates are validated against the layout before any board is touched.
    /// `Pulse` updates are collected and strobed after the other updates have
    /// been written.
    ///
    /// # Returns
    /// One report holding the update pass followed by the pulse passes. If
    /// any board failed the update pass, no pulse runs and that pass's
    /// report comes back inside [`RegisterError::PartialFailure`].
    pub async fn write_all(&self, updates: &FieldUpdates) -> Result<WriteReport, RegisterError> {
        let plan = self.plan(updates)?;

        let mut report = WriteReport::default();
        if !plan.direct.is_empty() || plan.pulses.is_empty() {
            report = self.write_pass(WritePass::Update, &plan.direct).await;
            if !report.is_complete() {
                if !plan.pulses.is_empty() {
                    warn!(
                        "{}: update pass failed, not pulsing {:?}",
                        self.layout.name(),
                        field_names(&plan.pulses)
                    );
                }
                return report.into_result();
            }
        }

        if !plan.pulses.is_empty() {
            debug!(
                "{}: pulsing deferred fields {:?}",
                self.layout.name(),
                field_names(&plan.pulses)
            );
            let pulsed = self.pulse_validated(&plan.pulses).await;
            report.outcomes.extend(pulsed.outcomes);
        }

        report.into_result()
    }

    /// Strobe flags: write them 0, then 1, then 0 on every board
    ///
    /// Each step is a full read-modify-write pass over all boards. Every
    /// step runs on every board even when earlier writes failed, so boards
    /// that took the 1 always get the final 0.
    pub async fn pulse<S: AsRef<str>>(&self, fields: &[S]) -> Result<WriteReport, RegisterError> {
        let mut specs: Vec<&FieldSpec> = Vec::with_capacity(fields.len());
        for field in fields {
            let spec = self.require_flag(field.as_ref())?;
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
        self.pulse_validated(&specs).await.into_result()
    }

    async fn pulse_validated(&self, fields: &[&FieldSpec]) -> WriteReport {
        let mut report = WriteReport::default();
        for pass in PULSE_PASSES {
            let level = pass.pulse_level().unwrap_or(false);
            let step: Vec<Planned> = fields
                .iter()
                .map(|spec| (*spec, FieldUpdate::Set(Value::Flag(level))))
                .collect();
            let done = self.write_pass(pass, &step).await;
            report.outcomes.extend(done.outcomes);
        }
        report
    }

    fn plan(&self, updates: &FieldUpdates) -> Result<WritePlan<'a>, RegisterError> {
        let mut plan = WritePlan {
            direct: Vec::new(),
            pulses: Vec::new(),
        };

        for (key, update) in updates.iter() {
            let spec = self
                .layout
                .field(key)
                .ok_or_else(|| RegisterError::UnknownKey {
                    register: self.layout.name().to_string(),
                    key: key.to_string(),
                })?;

            match update {
                FieldUpdate::Set(value) => {
                    spec.check(key, value)?;
                    plan.direct.push((spec, update));
                }
                FieldUpdate::Toggle => {
                    self.require_flag(key)?;
                    plan.direct.push((spec, update));
                }
                FieldUpdate::Pulse => {
                    self.require_flag(key)?;
                    if !plan.pulses.contains(&spec) {
                        plan.pulses.push(spec);
                    }
                }
            }
        }

        Ok(plan)
    }

    fn require_flag(&self, field: &str) -> Result<&'a FieldSpec, RegisterError> {
        match self.layout.field(field) {
            None => Err(RegisterError::UnknownKey {
                register: self.layout.name().to_string(),
                key: field.to_string(),
            }),
            Some(spec) if spec.kind() != FieldKind::Flag => Err(RegisterError::NotAFlag {
                field: field.to_string(),
            }),
            Some(spec) => Ok(spec),
        }
    }

    /// One read-modify-write over all boards, concurrently
    ///
    /// Never stops early: every board gets its attempt and failures are
    /// logged and left in the report.
    async fn write_pass(&self, pass: WritePass, updates: &[Planned<'_>]) -> WriteReport {
        let writes = self.targets().map(|(device, name)| async move {
            let result = self.read_modify_write(device, name, updates).await;
            WriteOutcome {
                device: device.id().clone(),
                register: name.to_string(),
                pass,
                result,
            }
        });

        let report = WriteReport {
            outcomes: join_all(writes).await,
        };

        for failed in report.failures() {
            if let Err(e) = &failed.result {
                warn!(
                    "{}:{} {} write failed: {}",
                    failed.device,
                    failed.register,
                    pass.as_str(),
                    e
                );
            }
        }
        report
    }

    async fn read_modify_write(
        &self,
        device: &BoxedDevice,
        name: &str,
        updates: &[Planned<'_>],
    ) -> Result<WrittenWord, TransportError> {
        let before = device.read_uint(name).await?;

        // Only the updated fields' bits change; reserved bits go back as read.
        let after = updates
            .iter()
            .fold(before, |word, (spec, update)| match update {
                FieldUpdate::Set(value) => spec.insert(word, *value),
                FieldUpdate::Toggle => word ^ spec.mask(),
                FieldUpdate::Pulse => word,
            });

        device.write_int(name, after).await?;
        debug!(
            "{}:{} 0x{:08X} -> 0x{:08X}",
            device.id(),
            name,
            before,
            after
        );
        Ok(WrittenWord { before, after })
    }
}

fn field_names<'s>(specs: &[&'s FieldSpec]) -> Vec<&'s str> {
    specs.iter().filter_map(|s| s.name()).collect()
}

/// Read `layout` from every board
pub async fn read_all(
    devices: &[BoxedDevice],
    layout: &RegisterLayout,
    names: Option<&[String]>,
) -> Result<Vec<DecodedRegister>, RegisterError> {
    MaskedRegister::new(devices, layout, names)?.read_all().await
}

/// Apply `updates` to `layout` on every board
pub async fn write_all(
    devices: &[BoxedDevice],
    layout: &RegisterLayout,
    updates: &FieldUpdates,
    names: Option<&[String]>,
) -> Result<WriteReport, RegisterError> {
    MaskedRegister::new(devices, layout, names)?
        .write_all(updates)
        .await
}

/// Pulse flags of `layout` on every board
pub async fn pulse<S: AsRef<str>>(
    devices: &[BoxedDevice],
    layout: &RegisterLayout,
    fields: &[S],
    names: Option<&[String]>,
) -> Result<WriteReport, RegisterError> {
    MaskedRegister::new(devices, layout, names)?
        .pulse(fields)
        .await
}
