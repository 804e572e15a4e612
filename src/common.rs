//! Byte-size constants and alignment helpers shared by the planner and
//! the image-type tables.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

pub const KB: u64 = 1000;
pub const MB: u64 = 1000 * KB;
pub const GB: u64 = 1000 * MB;

/// Round `value` up to the next multiple of `grain`.
pub fn align_up(value: u64, grain: u64) -> u64 {
    if grain == 0 {
        return value;
    }
    value.div_ceil(grain) * grain
}

/// Round `value` down to a multiple of `grain`.
/// Like [`align_up`], but `None` when the result does not fit in a `u64`.
pub fn checked_align_up(value: u64, grain: u64) -> Option<u64> {
    if grain == 0 {
        return Some(value);
    }
    value.div_ceil(grain).checked_mul(grain)
}

pub fn align_down(value: u64, grain: u64) -> u64 {
    if grain == 0 {
        return value;
    }
    value - value % grain
}

/// Parse a size such as `"5 GiB"`, `"512MiB"`, `"1 GB"` or `"1073741824"`.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(format!("size '{}' does not start with a number", input));
    }
    let value: u64 = number
        .parse()
        .map_err(|e| format!("size '{}': {}", input, e))?;

    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "kB" | "KB" => KB,
        "KiB" => KIB,
        "MB" => MB,
        "MiB" => MIB,
        "GB" => GB,
        "GiB" => GIB,
        "TB" => 1000 * GB,
        "TiB" => 1024 * GIB,
        other => return Err(format!("size '{}': unknown unit '{}'", input, other)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' overflows", input))
}
