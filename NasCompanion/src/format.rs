// NasCompanion/src/format.rs

//! 数值的人类可读格式化。
//!
//! 所有函数对负数、NaN、无穷大都有明确的退化输出，不会 panic。

const BYTE_UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
const BYTE_RATE_UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];
const BIT_RATE_UNITS: [&str; 5] = ["b/s", "Kb/s", "Mb/s", "Gb/s", "Tb/s"];

fn scale(value: f64, base: f64, units: &[&str], decimals: i32, zero: &str) -> String {
    if !value.is_finite() || value <= 0.0 {
        return zero.to_string();
    }
    let decimals = decimals.max(0) as usize;
    let mut scaled = value;
    let mut index = 0;
    while scaled >= base && index + 1 < units.len() {
        scaled /= base;
        index += 1;
    }
    format!("{:.*} {}", decimals, scaled, units[index])
}

/// 按 1024 进制格式化字节数，例如 `1536 → "1.5 KiB"`。
pub fn format_bytes(value: f64, decimals: i32) -> String {
    scale(value, 1024.0, &BYTE_UNITS, decimals, "0 B")
}

/// 字节速率，1024 进制。
pub fn format_bytes_per_second(value: f64, decimals: i32) -> String {
    scale(value, 1024.0, &BYTE_RATE_UNITS, decimals, "0 B/s")
}

/// 比特速率，1000 进制；参数单位为比特/秒。
pub fn format_bits_per_second(value: f64, decimals: i32) -> String {
    scale(value, 1000.0, &BIT_RATE_UNITS, decimals, "0 b/s")
}

/// 百分比，保留一位小数并限制在 0 到 100。
pub fn format_percent(value: f64) -> String {
    let value = if value.is_finite() { value.clamp(0.0, 100.0) } else { 0.0 };
    format!("{:.1}%", value)
}

/// 运行时长，例如 `93784 → "1d 2h 3m"`。
pub fn format_uptime(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0m".to_string();
    }
    let total_minutes = (seconds / 60.0).floor() as u64;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;
    match (days, hours) {
        (0, 0) => format!("{}m", minutes),
        (0, _) => format!("{}h {}m", hours, minutes),
        _ => format!("{}d {}h {}m", days, hours, minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(0.0, 2), "0 B");
        assert_eq!(format_bytes(1536.0, 1), "1.5 KiB");
        assert_eq!(format_bytes(512.0, 0), "512 B");
        assert_eq!(format_bytes(1024.0 * 1024.0 * 3.0, 2), "3.00 MiB");
        // 超出最大单位时停在 PiB
        assert_eq!(format_bytes(1024f64.powi(6), 0), "1024 PiB");
    }

    #[test]
    fn bytes_fall_back_on_bad_input() {
        assert_eq!(format_bytes(-1.0, 2), "0 B");
        assert_eq!(format_bytes(f64::NAN, 2), "0 B");
        assert_eq!(format_bytes(f64::INFINITY, 2), "0 B");
        assert_eq!(format_bytes(2048.0, -3), "2 KiB");
        assert_eq!(format_bytes(0.5, 1), "0.5 B");
    }

    #[test]
    fn rates_use_their_own_bases() {
        assert_eq!(format_bytes_per_second(1024.0, 0), "1 KB/s");
        assert_eq!(format_bytes_per_second(f64::NAN, 1), "0 B/s");
        assert_eq!(format_bits_per_second(1_500_000.0, 1), "1.5 Mb/s");
        assert_eq!(format_bits_per_second(999.0, 0), "999 b/s");
    }

    #[test]
    fn percent_and_uptime() {
        assert_eq!(format_percent(12.345), "12.3%");
        assert_eq!(format_percent(140.0), "100.0%");
        assert_eq!(format_percent(f64::NAN), "0.0%");
        assert_eq!(format_uptime(93_784.0), "1d 2h 3m");
        assert_eq!(format_uptime(3_660.0), "1h 1m");
        assert_eq!(format_uptime(-5.0), "0m");
    }
}
