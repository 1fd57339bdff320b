//! Text and JSON forms of an op list.
//!
//! The line format has one operation per line, arguments first and the
//! operation name last, separated by commas:
//!
//! ```text
//! lock
//! 0xdeadbeef,write
//! 100,wait
//! 80,read
//! sc_reset
//! ```
//!
//! A leading `lock` line requests a locked sequence. SCA commands are written
//! as a bare `command,data` pair; IC lines are `address,data,write` and
//! `address,read`. Decoding happens once, before anything runs: any bad line
//! fails the whole script with [`AlfError::Parse`].

use serde::de::DeserializeOwned;

use crate::error::{AlfError, AlfResult};
use crate::protocols::{CommandData, IcOp, ScaOp, SwtOp, SwtWord};

/// Decoded op list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script<T> {
    pub ops: Vec<T>,
    /// A leading `lock` line was present.
    pub lock: bool,
}

/// Parse a decimal number, or a hexadecimal one with a `0x` prefix.
pub fn parse_number(text: &str) -> AlfResult<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| AlfError::Parse(format!("invalid number \"{text}\": {e}")))
}

/// Parse a hexadecimal number; the `0x` prefix is optional.
pub fn parse_hex(text: &str) -> AlfResult<u32> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16)
        .map_err(|e| AlfError::Parse(format!("invalid hex value \"{text}\": {e}")))
}

fn parse_ms(text: &str) -> AlfResult<u64> {
    text.trim()
        .parse()
        .map_err(|_| AlfError::Parse(format!("\"{text}\" is not a number of milliseconds")))
}

/// An operation that can be read from one script line.
pub trait ScriptOp: Sized {
    /// Decode one line, already split on `,`.
    fn parse_fields(fields: &[&str]) -> AlfResult<Self>;
}

fn expect_args(name: &str, args: &[&str], allowed: std::ops::RangeInclusive<usize>) -> AlfResult<()> {
    if allowed.contains(&args.len()) {
        return Ok(());
    }
    let problem = if args.len() < *allowed.start() {
        "Too few"
    } else {
        "Too many"
    };
    Err(AlfError::Parse(format!(
        "{problem} arguments for {name} operation"
    )))
}

impl ScriptOp for SwtOp {
    fn parse_fields(fields: &[&str]) -> AlfResult<Self> {
        let (name, args) = split_name(fields)?;
        if args.len() > 1 {
            return Err(AlfError::Parse("SWT word pair not formatted correctly".into()));
        }
        match name {
            "write" => {
                expect_args(name, args, 1..=1)?;
                let value: SwtWord = args[0].parse()?;
                Ok(SwtOp::Write { value })
            }
            "read" => Ok(SwtOp::Read {
                timeout_ms: args.first().map(|ms| parse_ms(ms)).transpose()?,
            }),
            "wait" => Ok(SwtOp::Wait {
                ms: args.first().map(|ms| parse_ms(ms)).transpose()?,
            }),
            "sc_reset" => {
                expect_args(name, args, 0..=0)?;
                Ok(SwtOp::ScReset)
            }
            other => Err(unknown("SWT", other)),
        }
    }
}

impl ScriptOp for ScaOp {
    fn parse_fields(fields: &[&str]) -> AlfResult<Self> {
        let (name, args) = split_name(fields)?;
        match name {
            "wait" => {
                expect_args(name, args, 0..=1)?;
                Ok(ScaOp::Wait {
                    ms: args.first().map(|ms| parse_ms(ms)).transpose()?,
                })
            }
            "sc_reset" => {
                expect_args(name, args, 0..=0)?;
                Ok(ScaOp::ScReset)
            }
            "svl_reset" => {
                expect_args(name, args, 0..=0)?;
                Ok(ScaOp::SvlReset)
            }
            "svl_connect" => {
                expect_args(name, args, 0..=0)?;
                Ok(ScaOp::SvlConnect)
            }
            _ if fields.len() == 2 => Ok(ScaOp::Command(CommandData::new(
                parse_hex(fields[0])?,
                parse_hex(fields[1])?,
            ))),
            other => Err(unknown("SCA", other)),
        }
    }
}

impl ScriptOp for IcOp {
    fn parse_fields(fields: &[&str]) -> AlfResult<Self> {
        let (name, args) = split_name(fields)?;
        match name {
            "write" => {
                expect_args(name, args, 2..=2)?;
                Ok(IcOp::Write {
                    address: parse_hex(args[0])?,
                    data: parse_hex(args[1])?,
                })
            }
            "read" => {
                expect_args(name, args, 1..=1)?;
                Ok(IcOp::Read {
                    address: parse_hex(args[0])?,
                })
            }
            "wait" => {
                expect_args(name, args, 0..=1)?;
                Ok(IcOp::Wait {
                    ms: args.first().map(|ms| parse_ms(ms)).transpose()?,
                })
            }
            "sc_reset" => {
                expect_args(name, args, 0..=0)?;
                Ok(IcOp::ScReset)
            }
            other => Err(unknown("IC", other)),
        }
    }
}

fn split_name<'a, 'b>(fields: &'a [&'b str]) -> AlfResult<(&'b str, &'a [&'b str])> {
    fields
        .split_last()
        .map(|(name, args)| (*name, args))
        .ok_or_else(|| AlfError::Parse("empty operation".into()))
}

fn unknown(protocol: &str, name: &str) -> AlfError {
    AlfError::Parse(format!("unknown {protocol} operation \"{name}\""))
}

/// Decode a line-format script. Blank lines and `#` comments are skipped.
pub fn parse_script<T: ScriptOp>(text: &str) -> AlfResult<Script<T>> {
    let mut script = Script {
        ops: Vec::new(),
        lock: false,
    };

    let lines = text
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    for (index, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields == ["lock"] {
            if !script.ops.is_empty() || script.lock {
                return Err(AlfError::Parse(format!(
                    "line {}: lock must be the first operation",
                    index + 1
                )));
            }
            script.lock = true;
            continue;
        }
        let op = T::parse_fields(&fields)
            .map_err(|e| AlfError::Parse(format!("line {}: {e}", index + 1)))?;
        script.ops.push(op);
    }
    Ok(script)
}

/// Decode a JSON array of operations such as `[{"op": "write", "value": "0xdd"}]`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> AlfResult<Vec<T>> {
    serde_json::from_str(text).map_err(|e| AlfError::Parse(format!("invalid JSON op list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_number("0x10").unwrap(), 16);
        assert_eq!(parse_number("80").unwrap(), 80);
        assert!(parse_number("ten").is_err());
        assert_eq!(parse_hex("ff").unwrap(), 0xff);
        assert_eq!(parse_hex("0xdeadbeef").unwrap(), 0xdeadbeef);
    }

    #[test]
    fn test_swt_script() {
        let script: Script<SwtOp> =
            parse_script("lock\n0xdeadbeef,write\n\n100,wait\n80,read\nread\nsc_reset\n").unwrap();
        assert!(script.lock);
        assert_eq!(
            script.ops,
            vec![
                SwtOp::write(0xdeadbeef),
                SwtOp::wait(100),
                SwtOp::read(80),
                SwtOp::Read { timeout_ms: None },
                SwtOp::ScReset,
            ]
        );
    }

    #[test]
    fn test_swt_script_errors() {
        assert!(parse_script::<SwtOp>("write").is_err());
        assert!(parse_script::<SwtOp>("1,sc_reset").is_err());
        assert!(parse_script::<SwtOp>("0x1,command").is_err());
        assert!(parse_script::<SwtOp>("1,2,write").is_err());
        let err = parse_script::<SwtOp>("read\nlock").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_sca_script() {
        let script: Script<ScaOp> =
            parse_script("0x00010002,0xff000000\n5,wait\nsvl_reset\nsvl_connect\nsc_reset").unwrap();
        assert!(!script.lock);
        assert_eq!(script.ops[0], ScaOp::command(0x0001_0002, 0xff00_0000));
        assert_eq!(script.ops[1], ScaOp::wait(5));
        assert_eq!(script.ops[4], ScaOp::ScReset);
        assert!(parse_script::<ScaOp>("1,svl_connect").is_err());
        assert!(parse_script::<ScaOp>("frobnicate").is_err());
    }

    #[test]
    fn test_ic_script() {
        let script: Script<IcOp> = parse_script("0xbb,0xdd,write\n0xbb,read").unwrap();
        assert_eq!(script.ops, vec![IcOp::write(0xbb, 0xdd), IcOp::read(0xbb)]);
        assert!(parse_script::<IcOp>("0xbb,write").is_err());
        assert!(parse_script::<IcOp>("0xbb,0xdd,read").is_err());
    }

    #[test]
    fn test_json_ops() {
        let ops: Vec<SwtOp> =
            parse_json(r#"[{"op":"write","value":"0xdd"},{"op":"read","timeout_ms":80}]"#).unwrap();
        assert_eq!(ops, vec![SwtOp::write(0xdd), SwtOp::read(80)]);
        assert!(matches!(
            parse_json::<SwtOp>(r#"[{"op":"explode"}]"#),
            Err(AlfError::Parse(_))
        ));
    }
}
