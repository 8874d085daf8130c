use chrono::NaiveDate;

const INVOICE_FORMAT: &str = "%m/%d/%Y";
const LEDGER_FORMAT: &str = "%Y-%m-%d";

/// Normalizes an extracted invoice date to the ledger's `YYYY-MM-DD` form.
///
/// Slash dates are read as `MM/DD/YYYY`. Anything that does not parse is
/// returned trimmed but otherwise untouched, so callers fall back to comparing
/// raw strings. Blank input is `None`.
pub fn normalize_invoice_date(raw: Option<&str>) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if raw.contains('/') {
        if let Ok(date) = NaiveDate::parse_from_str(raw, INVOICE_FORMAT) {
            return Some(date.format(LEDGER_FORMAT).to_string());
        }
    }
    Some(raw.to_string())
}

/// Parses either accepted invoice format into a calendar date.
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, INVOICE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, LEDGER_FORMAT))
        .ok()
}

pub fn format_ledger_date(date: NaiveDate) -> String {
    date.format(LEDGER_FORMAT).to_string()
}
