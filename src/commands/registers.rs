//! Register command handlers: layouts, read, write, pulse.

use super::{CommandResult, Session};
use anyhow::{anyhow, bail};
use corrctl_fpga::{
    FieldKind, FieldSpec, FieldUpdate, FieldUpdates, MaskedRegister, RegisterError, RegisterLayout,
    Value, WritePass, WriteReport,
};
use serde::Serialize;

/// Parse one `FIELD=VALUE` update
///
/// VALUE is `true`/`false`/`on`/`off`, a decimal or `0x` hex integer,
/// `toggle` or `pulse`.
pub fn parse_update(expr: &str) -> anyhow::Result<(String, FieldUpdate)> {
    let (field, value) = expr
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{expr}'"))?;
    let field = field.trim();
    if field.is_empty() {
        bail!("Missing field name in '{expr}'");
    }

    let value = value.trim();
    let update = match value.to_lowercase().as_str() {
        "true" | "on" => FieldUpdate::Set(Value::Flag(true)),
        "false" | "off" => FieldUpdate::Set(Value::Flag(false)),
        "toggle" => FieldUpdate::Toggle,
        "pulse" => FieldUpdate::Pulse,
        v => {
            let n = match v.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => v.parse::<u32>(),
            }
            .map_err(|_| anyhow!("Invalid value '{value}' for field {field}"))?;
            FieldUpdate::Set(Value::Uint(n))
        }
    };
    Ok((field.to_string(), update))
}

/// Parse every update of a `write` command
pub fn parse_updates(exprs: &[String]) -> anyhow::Result<FieldUpdates> {
    exprs.iter().map(|e| parse_update(e)).collect()
}

#[derive(Serialize)]
struct LayoutRow<'a> {
    name: &'a str,
    fields: &'a [FieldSpec],
}

/// List configured layouts
pub fn layouts(session: &Session) -> CommandResult {
    let layouts = session.fleet.layouts();
    if session.json {
        let rows: Vec<LayoutRow> = layouts
            .iter()
            .map(|l| LayoutRow {
                name: l.name(),
                fields: l.fields(),
            })
            .collect();
        return session.print_json(&rows);
    }

    if layouts.is_empty() {
        println!("No layouts configured");
    }
    for layout in layouts {
        println!("{}:", layout.name());
        println!("  {:<7} {:<24} {:<8}", "Bits", "Field", "Kind");
        for spec in layout.fields() {
            let bits = if spec.width() == 1 {
                format!("{}", spec.offset())
            } else {
                format!("{}-{}", spec.offset() + spec.width() - 1, spec.offset())
            };
            let kind = match spec.kind() {
                FieldKind::Flag => "flag",
                FieldKind::Uint => "uint",
                FieldKind::Padding => "padding",
            };
            println!("  {:<7} {:<24} {:<8}", bits, spec.name().unwrap_or("-"), kind);
        }
    }
    Ok(())
}

/// Read and decode a register on every device
pub async fn read(session: &Session, layout: &str, names: Option<&[String]>) -> CommandResult {
    let layout = session.fleet.layout(layout)?;
    let regs = MaskedRegister::new(&session.devices, layout, names)?
        .read_all()
        .await?;

    if session.json {
        return session.print_json(&regs);
    }

    for reg in &regs {
        println!("{:<24} 0x{:08X}", reg.qualified_name(), reg.raw);
        for name in layout.field_names() {
            if let Some(value) = reg.get(name) {
                println!("  {name:<24} {value}");
            }
        }
    }
    Ok(())
}

/// Apply FIELD=VALUE updates on every device
pub async fn write(
    session: &Session,
    layout: &str,
    updates: &[String],
    names: Option<&[String]>,
) -> CommandResult {
    let layout = session.fleet.layout(layout)?;
    let updates = parse_updates(updates)?;
    let result = MaskedRegister::new(&session.devices, layout, names)?
        .write_all(&updates)
        .await;
    finish(session, layout, result)
}

/// Strobe flags on every device
pub async fn pulse(
    session: &Session,
    layout: &str,
    fields: &[String],
    names: Option<&[String]>,
) -> CommandResult {
    let layout = session.fleet.layout(layout)?;
    let result = MaskedRegister::new(&session.devices, layout, names)?
        .pulse(fields)
        .await;
    finish(session, layout, result)
}

#[derive(Serialize)]
struct WriteRow<'a> {
    device: &'a str,
    register: &'a str,
    pass: WritePass,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn finish(
    session: &Session,
    layout: &RegisterLayout,
    result: Result<WriteReport, RegisterError>,
) -> CommandResult {
    match result {
        Ok(report) => print_report(session, &report),
        Err(RegisterError::PartialFailure(report)) => {
            print_report(session, &report)?;
            bail!(
                "{}: {} of {} devices failed",
                layout.name(),
                report.failed_devices().len(),
                report.devices().len()
            );
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(session: &Session, report: &WriteReport) -> CommandResult {
    if session.json {
        let rows: Vec<WriteRow> = report
            .outcomes
            .iter()
            .map(|o| WriteRow {
                device: o.device.as_str(),
                register: &o.register,
                pass: o.pass,
                before: o.result.as_ref().ok().map(|w| w.before),
                after: o.result.as_ref().ok().map(|w| w.after),
                error: o.result.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        return session.print_json(&rows);
    }

    for outcome in &report.outcomes {
        let target = format!("{}:{}", outcome.device, outcome.register);
        let pass = outcome.pass.as_str();
        match &outcome.result {
            Ok(word) => println!(
                "{:<24} {:<13} 0x{:08X} -> 0x{:08X}",
                target, pass, word.before, word.after
            ),
            Err(e) => println!("{target:<24} {pass:<13} FAILED: {e}"),
        }
    }
    Ok(())
}
