use std::fmt;

use serde::Serialize;

use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Uncertainty
// ---------------------------------------------------------------------------

/// Non-numeric uncertainty markers used by evaluated data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitKind {
    Lt,
    Gt,
    Le,
    Ge,
    Ap,
    Ca,
    Sy,
    Unknown,
}

impl LimitKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "LT" => Some(Self::Lt),
            "GT" => Some(Self::Gt),
            "LE" => Some(Self::Le),
            "GE" => Some(Self::Ge),
            "AP" => Some(Self::Ap),
            "CA" => Some(Self::Ca),
            "SY" => Some(Self::Sy),
            "?" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lt => write!(f, "LT"),
            Self::Gt => write!(f, "GT"),
            Self::Le => write!(f, "LE"),
            Self::Ge => write!(f, "GE"),
            Self::Ap => write!(f, "AP"),
            Self::Ca => write!(f, "CA"),
            Self::Sy => write!(f, "SY"),
            Self::Unknown => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Uncertainty {
    None,
    Symmetric { value: f64 },
    Asymmetric { upper: f64, lower: f64 },
    Limit { limit: LimitKind },
}

impl Uncertainty {
    pub fn upper(&self) -> f64 {
        match self {
            Self::Symmetric { value } => *value,
            Self::Asymmetric { upper, .. } => *upper,
            Self::None | Self::Limit { .. } => 0.0,
        }
    }

    pub fn lower(&self) -> f64 {
        match self {
            Self::Symmetric { value } => *value,
            Self::Asymmetric { lower, .. } => *lower,
            Self::None | Self::Limit { .. } => 0.0,
        }
    }

    /// Single-sided width used for compatibility tests. Asymmetric
    /// uncertainties use the wider side.
    pub fn sigma(&self) -> f64 {
        self.upper().max(self.lower())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Symmetric { .. } | Self::Asymmetric { .. })
    }

    /// Parse uncertainty text. Bare digits apply to the last significant
    /// digit of `numeric` (`"100.3"` + `"3"` is 0.3).
    fn parse(text: &str, numeric: Option<&str>, value_text: &str) -> Result<Self, ParseError> {
        let err = || ParseError::Uncertainty {
            value: value_text.to_string(),
            unc: text.to_string(),
        };

        if text.is_empty() {
            return Ok(Self::None);
        }
        if let Some(limit) = LimitKind::from_token(text) {
            return Ok(Self::Limit { limit });
        }

        let scale = numeric.map(last_digit_scale).unwrap_or(1.0);

        if text.starts_with('+') || text.starts_with('-') {
            // "+3-2" or "-2+3"
            let split = text[1..]
                .find(|c: char| c == '+' || c == '-')
                .map(|i| i + 1)
                .ok_or_else(err)?;
            let (first, second) = text.split_at(split);
            let mut upper = None;
            let mut lower = None;
            for part in [first, second] {
                let (sign, digits) = part.split_at(1);
                let v = parse_digits(digits, scale).ok_or_else(err)?;
                if sign == "+" {
                    upper = Some(v);
                } else {
                    lower = Some(v);
                }
            }
            return match (upper, lower) {
                (Some(upper), Some(lower)) => Ok(Self::Asymmetric { upper, lower }),
                _ => Err(err()),
            };
        }

        parse_digits(text, scale)
            .map(|value| Self::Symmetric { value })
            .ok_or_else(err)
    }
}

/// Digits scale by the value's last place; explicit decimals are absolute.
fn parse_digits(text: &str, scale: f64) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    if text.contains('.') {
        return text.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0);
    }
    if !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse::<u64>().ok().map(|d| d as f64 * scale)
}

const MAX_DECIMAL_EXPONENT: i32 = 400;

fn last_digit_scale(numeric: &str) -> f64 {
    let (mantissa, exponent) = match numeric.find('E') {
        Some(i) => (&numeric[..i], numeric[i + 1..].parse::<i32>().unwrap_or(0)),
        None => (numeric, 0),
    };
    let decimals = mantissa.split('.').nth(1).map(|frac| frac.len()).unwrap_or(0);
    // beyond f64's decimal range the scale is 0 or infinite anyway
    let exponent = exponent.clamp(-MAX_DECIMAL_EXPONENT, MAX_DECIMAL_EXPONENT);
    let decimals = i32::try_from(decimals).map_or(MAX_DECIMAL_EXPONENT, |d| d.min(MAX_DECIMAL_EXPONENT));
    10f64.powi(exponent - decimals)
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

/// A measured value, optionally offset from a symbolic placeholder
/// (`X`, `SN+X`, `1200+Y`). Values on different placeholder scales are
/// never comparable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: f64,
    pub uncertainty: Uncertainty,
}

impl Quantity {
    pub fn new(value: f64, uncertainty: Uncertainty) -> Self {
        Self {
            label: None,
            value,
            uncertainty,
        }
    }

    pub fn with_sigma(value: f64, sigma: f64) -> Self {
        Self::new(value, Uncertainty::Symmetric { value: sigma })
    }

    /// Parse a value/uncertainty text pair. Accepts `"100.3"`+`"3"`,
    /// inline `"100.0(2)"`, asymmetric `"+3-2"`, limit markers, and
    /// placeholder forms.
    pub fn parse(value_text: &str, unc_text: &str) -> Result<Self, ParseError> {
        let text = value_text.trim().to_ascii_uppercase();
        if text.is_empty() {
            return Err(ParseError::Value(value_text.to_string()));
        }

        let (body, inline_unc) = split_inline(&text)
            .ok_or_else(|| ParseError::Value(value_text.to_string()))?;

        let unc_text = unc_text.trim().to_ascii_uppercase();
        let unc_src = if unc_text.is_empty() {
            inline_unc.unwrap_or("")
        } else {
            unc_text.as_str()
        };

        let mut value = 0.0;
        let mut numeric: Option<&str> = None;
        let mut labels: Vec<&str> = Vec::new();

        if let Some(v) = parse_finite(body) {
            value = v;
            numeric = Some(body);
        } else {
            for token in body.split('+').map(str::trim) {
                if let Some(v) = parse_finite(token) {
                    if numeric.is_some() {
                        return Err(ParseError::Value(value_text.to_string()));
                    }
                    value = v;
                    numeric = Some(token);
                } else if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic()) {
                    labels.push(token);
                } else {
                    return Err(ParseError::Value(value_text.to_string()));
                }
            }
        }

        let uncertainty = Uncertainty::parse(unc_src, numeric, value_text)?;
        let label = if labels.is_empty() {
            None
        } else {
            Some(labels.join("+"))
        };

        Ok(Self {
            label,
            value,
            uncertainty,
        })
    }

    pub fn sigma(&self) -> f64 {
        self.uncertainty.sigma()
    }

    pub fn is_placeholder(&self) -> bool {
        self.label.is_some()
    }

    /// Absolute difference, or `None` when the two sit on different
    /// placeholder scales.
    pub fn residual(&self, other: &Quantity) -> Option<f64> {
        if self.label != other.label {
            return None;
        }
        Some((self.value - other.value).abs())
    }

    pub fn combined_sigma(&self, other: &Quantity) -> f64 {
        (self.sigma().powi(2) + other.sigma().powi(2)).sqrt()
    }

    /// Within `tolerance`, or within `n_sigma` combined uncertainties.
    pub fn comparable(&self, other: &Quantity, tolerance: f64, n_sigma: f64) -> bool {
        match self.residual(other) {
            Some(d) => d <= tolerance || d <= n_sigma * self.combined_sigma(other),
            None => false,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, self.value) {
            (Some(label), v) if v == 0.0 => write!(f, "{label}"),
            (Some(label), v) => write!(f, "{v}+{label}"),
            (None, v) => write!(f, "{v}"),
        }
    }
}

fn parse_finite(token: &str) -> Option<f64> {
    // `f64::from_str` accepts "inf"/"nan"; letters other than an exponent
    // marker mean a placeholder token.
    if token.is_empty() || token.chars().any(|c| c.is_ascii_alphabetic() && c != 'E') {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `"100.0(2)"` → (`"100.0"`, `Some("2")`).
fn split_inline(text: &str) -> Option<(&str, Option<&str>)> {
    match text.find('(') {
        None => Some((text, None)),
        Some(open) => {
            let inner = text[open + 1..].strip_suffix(')')?;
            Some((text[..open].trim(), Some(inner.trim())))
        }
    }
}
