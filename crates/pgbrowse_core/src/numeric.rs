//! Binary NUMERIC codec for values `rust_decimal` cannot hold exactly.
//!
//! PostgreSQL sends NUMERIC as base-10000 digit groups:
//! `ndigits, weight, sign, dscale` (all 16-bit) followed by `ndigits` groups.
//! `rust_decimal` stops at 28 significant digits and has no NaN or
//! infinities; those values cross the crate through here as decimal text.

type BoxError = Box<dyn std::error::Error + Sync + Send>;

const POSITIVE: u16 = 0x0000;
const NEGATIVE: u16 = 0x4000;
const NAN: u16 = 0xC000;
const POS_INFINITY: u16 = 0xD000;
const NEG_INFINITY: u16 = 0xF000;

/// Decode a NUMERIC value to decimal text.
pub(crate) fn decode(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("invalid numeric value".into());
    }
    let read = |at: usize| i16::from_be_bytes([raw[at], raw[at + 1]]);

    let ndigits = usize::try_from(read(0))?;
    let weight = i32::from(read(2));
    let sign = read(4) as u16;
    let dscale = usize::try_from(read(6))?;

    if raw.len() < 8 + ndigits * 2 {
        return Err("truncated numeric value".into());
    }
    let digits: Vec<i16> = (0..ndigits).map(|n| read(8 + n * 2)).collect();
    let digit_at =
        |pos: i32| usize::try_from(pos).ok().and_then(|p| digits.get(p).copied()).unwrap_or(0);

    match sign {
        NAN => return Ok("NaN".to_string()),
        POS_INFINITY => return Ok("Infinity".to_string()),
        NEG_INFINITY => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let mut out = String::new();
    if sign == NEGATIVE {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&digit_at(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

/// Encode decimal text such as `-12.50` as a NUMERIC value.
///
/// Exponent notation is not accepted.
pub(crate) fn encode(text: &str) -> Result<Vec<u8>, BoxError> {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "nan" => return Ok(header(0, 0, NAN, 0)),
        "infinity" | "+infinity" => return Ok(header(0, 0, POS_INFINITY, 0)),
        "-infinity" => return Ok(header(0, 0, NEG_INFINITY, 0)),
        _ => {}
    }

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (NEGATIVE, rest),
        None => (POSITIVE, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(format!("invalid numeric value: {text:?}").into());
    }

    let dscale = i16::try_from(frac_part.len())?;
    let int_part = int_part.trim_start_matches('0');

    let mut int_digits = "0".repeat((4 - int_part.len() % 4) % 4);
    int_digits.push_str(int_part);
    let mut frac_digits = frac_part.to_string();
    frac_digits.push_str(&"0".repeat((4 - frac_part.len() % 4) % 4));

    let group = |chunk: &[u8]| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'));
    let int_groups: Vec<i16> = int_digits.as_bytes().chunks(4).map(group).collect();
    let mut groups: Vec<i16> = int_groups.clone();
    groups.extend(frac_digits.as_bytes().chunks(4).map(group));

    let mut weight = i16::try_from(int_groups.len())? - 1;
    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i16::try_from(leading)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        return Ok(header(0, 0, POSITIVE, dscale));
    }

    let mut out = header(i16::try_from(groups.len())?, weight, sign, dscale);
    for g in groups {
        out.extend_from_slice(&g.to_be_bytes());
    }
    Ok(out)
}

fn header(ndigits: i16, weight: i16, sign: u16, dscale: i16) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&ndigits.to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    out
}
