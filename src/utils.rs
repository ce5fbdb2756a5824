use crate::error::{ConversionError, Result};

pub const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

pub fn validate_month(year: i32, month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(ConversionError::InvalidPeriod { year, month });
    }
    Ok(())
}

pub fn month_name(month: u32) -> Option<&'static str> {
    let index = usize::try_from(month).ok()?.checked_sub(1)?;
    MONTH_NAMES.get(index).copied()
}

/// Builds the persistence key for a period, e.g. `2024-03`.
pub fn build_period_key(year: i32, month: u32) -> String {
    format!("{}-{:02}", year, month)
}

/// Spanish presentation of an amount: `.` groups thousands, `,` separates two decimals.
pub fn format_amount(value: f64) -> String {
    let rendered = format!("{:.2}", value.abs());
    let (integer, decimals) = rendered.split_once('.').unwrap_or((rendered.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && rendered != "0.00" { "-" } else { "" };
    format!("{}{},{}", sign, grouped, decimals)
}
