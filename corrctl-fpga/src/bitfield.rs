//! Bitfield codec for 32-bit registers
//!
//! A [`RegisterLayout`] splits one 32-bit word into named flags, unsigned
//! bit-ranges and unnamed padding. Fields are declared MSB-first, the way
//! register maps are usually drawn: the first declared field occupies the
//! most significant bits.
//!
//! ```text
//!  31                        7   6      5      4           0
//! +---------------------------+-------+--------+-----------+
//! |        padding (25)       | reset | enable | padding(5)|
//! +---------------------------+-------+--------+-----------+
//! ```
//!
//! Layouts are validated once, when built. Decoding never fails; encoding
//! fails only on unknown field names or values that do not fit.

use std::collections::BTreeMap;
use std::fmt;

use corrctl_transport::DeviceId;
use serde::Serialize;

use crate::error::{LayoutError, RegisterError};

/// Register width in bits
pub const REGISTER_BITS: u32 = 32;

// ── Values ───────────────────────────────────────────────────────────

/// Decoded value of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Flag(bool),
    Uint(u32),
}

impl Value {
    /// Boolean view; `None` for integers
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            Value::Uint(_) => None,
        }
    }

    /// Integer view; flags read as 0 or 1
    pub fn as_u32(&self) -> u32 {
        match self {
            Value::Flag(b) => *b as u32,
            Value::Uint(v) => *v,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Flag(b)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Flag(b) => write!(f, "{b}"),
            Value::Uint(v) => write!(f, "{v}"),
        }
    }
}

/// Field name to value mapping
pub type FieldMap = BTreeMap<String, Value>;

// ── Field specs ──────────────────────────────────────────────────────

/// What a run of bits means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Flag,
    Uint,
    Padding,
}

/// Field declaration, in MSB-first order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDef {
    /// Single-bit boolean
    Flag(String),
    /// Unsigned integer of the given width
    Uint(String, u8),
    /// Reserved bits, never exposed
    Padding(u8),
}

/// One placed field of a layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    name: Option<String>,
    width: u8,
    offset: u8,
    kind: FieldKind,
}

impl FieldSpec {
    /// Field name; `None` for padding
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Bit offset of the field's least significant bit
    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Largest value the field can hold
    pub fn max_value(&self) -> u32 {
        if u32::from(self.width) >= REGISTER_BITS {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Mask of the field's bits in place within the word
    pub fn mask(&self) -> u32 {
        self.max_value() << self.offset
    }

    fn extract(&self, word: u32) -> Value {
        let bits = (word >> self.offset) & self.max_value();
        match self.kind {
            FieldKind::Flag => Value::Flag(bits != 0),
            _ => Value::Uint(bits),
        }
    }

    /// Check `value` against the field and return it shifted into place
    fn pack(&self, field: &str, value: Value) -> Result<u32, RegisterError> {
        let bits = value.as_u32();
        if bits > self.max_value() {
            return Err(RegisterError::Range {
                field: field.to_string(),
                value: bits,
                width: self.width,
            });
        }
        Ok(bits << self.offset)
    }

    pub(crate) fn check(&self, field: &str, value: Value) -> Result<(), RegisterError> {
        self.pack(field, value).map(|_| ())
    }

    /// Replace the field's bits in `word`, leaving every other bit as is
    ///
    /// `value` is truncated to the field width; callers check it first.
    pub(crate) fn insert(&self, word: u32, value: Value) -> u32 {
        (word & !self.mask()) | ((value.as_u32() & self.max_value()) << self.offset)
    }
}

// ── Layout ───────────────────────────────────────────────────────────

/// Validated description of one 32-bit register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterLayout {
    name: String,
    fields: Vec<FieldSpec>,
}

impl RegisterLayout {
    /// Start declaring a layout for the register `name`
    pub fn builder(name: impl Into<String>) -> LayoutBuilder {
        LayoutBuilder {
            name: name.into(),
            defs: Vec::new(),
        }
    }

    /// Build a layout from MSB-first declarations
    ///
    /// # Errors
    /// [`LayoutError`] if widths do not sum to 32, a field is zero-width,
    /// or a name is empty or repeated.
    pub fn new(name: impl Into<String>, defs: Vec<FieldDef>) -> Result<Self, LayoutError> {
        let name = name.into();

        let mut seen = Vec::<&str>::new();
        for def in &defs {
            let (field, width) = match def {
                FieldDef::Flag(field) => (field.as_str(), 1),
                FieldDef::Uint(field, width) => (field.as_str(), *width),
                FieldDef::Padding(width) => ("<padding>", *width),
            };
            if width == 0 {
                return Err(LayoutError::ZeroWidth {
                    layout: name,
                    field: field.to_string(),
                });
            }
            if matches!(def, FieldDef::Padding(_)) {
                continue;
            }
            if field.is_empty() {
                return Err(LayoutError::EmptyName { layout: name });
            }
            if seen.contains(&field) {
                return Err(LayoutError::DuplicateField {
                    layout: name,
                    field: field.to_string(),
                });
            }
            seen.push(field);
        }

        let total: u32 = defs.iter().map(|d| u32::from(def_width(d))).sum();
        if total != REGISTER_BITS {
            return Err(LayoutError::WidthSum {
                layout: name,
                total,
            });
        }

        let mut consumed = 0u32;
        let fields = defs
            .into_iter()
            .map(|def| {
                let width = def_width(&def);
                consumed += u32::from(width);
                // widths sum to exactly 32, so this never underflows
                let offset = (REGISTER_BITS - consumed) as u8;
                let (name, kind) = match def {
                    FieldDef::Flag(n) => (Some(n), FieldKind::Flag),
                    FieldDef::Uint(n, _) => (Some(n), FieldKind::Uint),
                    FieldDef::Padding(_) => (None, FieldKind::Padding),
                };
                FieldSpec {
                    name,
                    width,
                    offset,
                    kind,
                }
            })
            .collect();

        Ok(Self { name, fields })
    }

    /// Canonical register name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields including padding, MSB-first
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a named (non-padding) field
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name() == Some(name))
    }

    /// Names of all exposed fields, MSB-first
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(FieldSpec::name)
    }

    /// Decode a register word
    pub fn decode(&self, word: u32) -> DecodedRegister {
        let fields = self
            .fields
            .iter()
            .filter_map(|f| f.name().map(|n| (n.to_string(), f.extract(word))))
            .collect();

        DecodedRegister {
            register: self.name.clone(),
            device: None,
            raw: word,
            fields,
        }
    }

    /// Decode a register as it travels on the wire (big-endian)
    pub fn decode_bytes(&self, bytes: [u8; 4]) -> DecodedRegister {
        self.decode(u32::from_be_bytes(bytes))
    }

    /// Encode field values into a register word
    ///
    /// Fields missing from `fields` and all padding encode as zero.
    pub fn encode(&self, fields: &FieldMap) -> Result<u32, RegisterError> {
        let mut word = 0u32;
        for (name, value) in fields {
            let spec = self.field(name).ok_or_else(|| RegisterError::UnknownField {
                register: self.name.clone(),
                field: name.clone(),
            })?;
            word |= spec.pack(name, *value)?;
        }
        Ok(word)
    }

    /// Mask of every padding bit in the word
    pub fn padding_mask(&self) -> u32 {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Padding)
            .fold(0, |acc, f| acc | f.mask())
    }

    /// Re-encode a decoded register
    ///
    /// Named fields come from `reg.fields`; padding bits are carried over
    /// from `reg.raw`, so re-encoding an unmodified decode returns the
    /// original word.
    pub fn encode_register(&self, reg: &DecodedRegister) -> Result<u32, RegisterError> {
        Ok(self.encode(&reg.fields)? | (reg.raw & self.padding_mask()))
    }

    /// Encode into wire byte order (big-endian)
    pub fn encode_bytes(&self, fields: &FieldMap) -> Result<[u8; 4], RegisterError> {
        self.encode(fields).map(u32::to_be_bytes)
    }
}

fn def_width(def: &FieldDef) -> u8 {
    match def {
        FieldDef::Flag(_) => 1,
        FieldDef::Uint(_, width) | FieldDef::Padding(width) => *width,
    }
}

/// Builder for [`RegisterLayout`]
///
/// ```
/// use corrctl_fpga::RegisterLayout;
///
/// let layout = RegisterLayout::builder("control")
///     .padding(25)
///     .flag("reset")
///     .flag("enable")
///     .padding(5)
///     .build()
///     .unwrap();
/// assert_eq!(layout.field("enable").unwrap().offset(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    name: String,
    defs: Vec<FieldDef>,
}

impl LayoutBuilder {
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.defs.push(FieldDef::Flag(name.into()));
        self
    }

    pub fn uint(mut self, name: impl Into<String>, width: u8) -> Self {
        self.defs.push(FieldDef::Uint(name.into(), width));
        self
    }

    pub fn padding(mut self, width: u8) -> Self {
        self.defs.push(FieldDef::Padding(width));
        self
    }

    pub fn build(self) -> Result<RegisterLayout, LayoutError> {
        RegisterLayout::new(self.name, self.defs)
    }
}

// ── Decoded register ─────────────────────────────────────────────────

/// A register word split into its named fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedRegister {
    /// Register the word was read from
    pub register: String,
    /// Board the word was read from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    /// Word exactly as read, including padding bits
    pub raw: u32,
    pub fields: FieldMap,
}

impl DecodedRegister {
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.get(field).copied()
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(|v| v.as_bool())
    }

    pub fn uint(&self, field: &str) -> Option<u32> {
        self.get(field).map(|v| v.as_u32())
    }

    /// Replace a field value; checked when re-encoded
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// `device:register`, or just the register for unattached words
    pub fn qualified_name(&self) -> String {
        match &self.device {
            Some(device) => format!("{device}:{}", self.register),
            None => self.register.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enable_reset() -> RegisterLayout {
        RegisterLayout::builder("control")
            .padding(25)
            .flag("reset")
            .flag("enable")
            .padding(5)
            .build()
            .unwrap()
    }

    /// F-engine status register shape: mixed flags, a 2-bit counter and gaps
    fn fstatus() -> RegisterLayout {
        RegisterLayout::builder("fstatus0")
            .padding(2)
            .uint("sync_val", 2)
            .padding(10)
            .flag("xaui_lnkdn")
            .flag("xaui_over")
            .padding(9)
            .flag("dram_err")
            .flag("clk_err")
            .flag("adc_disabled")
            .flag("ct_error")
            .flag("adc_overrange")
            .flag("fft_overrange")
            .flag("quant_overrange")
            .build()
            .unwrap()
    }

    #[test]
    fn test_offsets_are_msb_first() {
        let layout = fstatus();
        assert_eq!(layout.field("sync_val").unwrap().offset(), 28);
        assert_eq!(layout.field("xaui_lnkdn").unwrap().offset(), 17);
        assert_eq!(layout.field("dram_err").unwrap().offset(), 6);
        assert_eq!(layout.field("quant_overrange").unwrap().offset(), 0);
        assert_eq!(layout.field("sync_val").unwrap().mask(), 0x3000_0000);
    }

    #[test]
    fn test_decode_and_set_example() {
        let layout = enable_reset();
        let mut reg = layout.decode(0x0000_0020);
        assert_eq!(reg.flag("enable"), Some(true));
        assert_eq!(reg.flag("reset"), Some(false));
        assert_eq!(reg.raw, 0x20);
        assert_eq!(reg.fields.len(), 2);

        reg.set("reset", true);
        assert_eq!(layout.encode(&reg.fields).unwrap(), 0x0000_0060);
    }

    #[test]
    fn test_width_sum_rejected() {
        let short = RegisterLayout::builder("r").padding(30).flag("a").build();
        assert_eq!(
            short,
            Err(LayoutError::WidthSum {
                layout: "r".into(),
                total: 31
            })
        );

        let long = RegisterLayout::builder("r").uint("a", 32).flag("b").build();
        assert!(matches!(long, Err(LayoutError::WidthSum { total: 33, .. })));
    }

    #[test]
    fn test_bad_names_and_widths_rejected() {
        let dup = RegisterLayout::builder("r")
            .flag("a")
            .flag("a")
            .padding(30)
            .build();
        assert!(matches!(dup, Err(LayoutError::DuplicateField { .. })));

        let empty = RegisterLayout::builder("r").flag("").padding(31).build();
        assert!(matches!(empty, Err(LayoutError::EmptyName { .. })));

        let zero = RegisterLayout::builder("r")
            .uint("a", 0)
            .padding(32)
            .build();
        assert!(matches!(zero, Err(LayoutError::ZeroWidth { .. })));
    }

    #[test]
    fn test_full_width_field() {
        let layout = RegisterLayout::builder("count")
            .uint("value", 32)
            .build()
            .unwrap();
        let reg = layout.decode(u32::MAX);
        assert_eq!(reg.uint("value"), Some(u32::MAX));
        assert_eq!(layout.encode(&reg.fields).unwrap(), u32::MAX);
    }

    #[test]
    fn test_round_trip() {
        let layout = fstatus();
        for word in [0u32, 0x3000_0000, 0x1003_0041, 0xFFFF_FFFF, 0xDEAD_BEEF] {
            let reg = layout.decode(word);
            assert_eq!(layout.encode_register(&reg).unwrap(), word, "word {word:#x}");
        }
    }

    #[test]
    fn test_padding_bits_stay_in_raw_only() {
        let layout = enable_reset();
        assert_eq!(layout.padding_mask(), 0xFFFF_FF9F);

        let mut reg = layout.decode(0xFFFF_FFFF);
        assert_eq!(reg.raw, 0xFFFF_FFFF);
        assert_eq!(reg.fields.len(), 2);
        assert_eq!(layout.encode(&reg.fields).unwrap(), 0x0000_0060);

        reg.set("enable", false);
        assert_eq!(layout.encode_register(&reg).unwrap(), 0xFFFF_FFDF);
    }

    #[test]
    fn test_field_isolation() {
        let layout = fstatus();
        let before = layout.decode(0x2002_0045);

        let mut after = before.clone();
        after.set("sync_val", 1u32);
        let word = layout.encode(&after.fields).unwrap();
        let redecoded = layout.decode(word);

        for name in layout.field_names() {
            if name == "sync_val" {
                assert_eq!(redecoded.uint(name), Some(1));
            } else {
                assert_eq!(redecoded.get(name), before.get(name), "field {name}");
            }
        }
    }

    #[test]
    fn test_insert_replaces_only_field_bits() {
        let layout = fstatus();
        let sync = layout.field("sync_val").unwrap();
        let dram = layout.field("dram_err").unwrap();

        assert_eq!(sync.insert(0xFFFF_FFFF, Value::Uint(1)), 0xDFFF_FFFF);
        assert_eq!(sync.insert(0x0000_0045, Value::Uint(3)), 0x3000_0045);
        assert_eq!(dram.insert(0x0000_0045, Value::Flag(false)), 0x0000_0005);
        assert_eq!(dram.insert(0x0000_0000, Value::Flag(true)), 0x0000_0040);
        // wider than the field: only the low bits land
        assert_eq!(sync.insert(0, Value::Uint(0x6)), 0x2000_0000);
    }

    #[test]
    fn test_range_boundaries() {
        let layout = fstatus();
        let mut fields = FieldMap::new();

        fields.insert("sync_val".into(), Value::Uint(3));
        assert_eq!(layout.encode(&fields).unwrap(), 0x3000_0000);

        fields.insert("sync_val".into(), Value::Uint(4));
        assert!(matches!(
            layout.encode(&fields),
            Err(RegisterError::Range {
                value: 4,
                width: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_flag_accepts_zero_and_one_integers() {
        let layout = enable_reset();
        let mut fields = FieldMap::new();
        fields.insert("enable".into(), Value::Uint(1));
        assert_eq!(layout.encode(&fields).unwrap(), 0x20);

        fields.insert("enable".into(), Value::Uint(2));
        assert!(matches!(
            layout.encode(&fields),
            Err(RegisterError::Range { width: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let layout = enable_reset();
        let mut fields = FieldMap::new();
        fields.insert("arm".into(), Value::Flag(true));
        assert!(matches!(
            layout.encode(&fields),
            Err(RegisterError::UnknownField { ref field, .. }) if field == "arm"
        ));
    }

    #[test]
    fn test_wire_byte_order() {
        let layout = fstatus();
        let reg = layout.decode_bytes([0x10, 0x00, 0x00, 0x01]);
        assert_eq!(reg.raw, 0x1000_0001);
        assert_eq!(reg.uint("sync_val"), Some(1));
        assert_eq!(reg.flag("quant_overrange"), Some(true));
        assert_eq!(
            layout.encode_bytes(&reg.fields).unwrap(),
            [0x10, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn test_qualified_name() {
        let mut reg = enable_reset().decode(0);
        assert_eq!(reg.qualified_name(), "control");
        reg.device = Some(DeviceId::new("roach3"));
        assert_eq!(reg.qualified_name(), "roach3:control");
    }
}
