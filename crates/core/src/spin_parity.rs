use std::fmt;

use serde::Serialize;

use crate::error::ParseError;

/// Largest number of J values a range like `1/2:41/2` may expand to.
const MAX_RANGE_OPTIONS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    Plus,
    Minus,
    Unknown,
}

impl Parity {
    fn compatible(self, other: Parity) -> bool {
        self == Parity::Unknown || other == Parity::Unknown || self == other
    }

    fn merge(self, other: Parity) -> Parity {
        if self == Parity::Unknown {
            other
        } else {
            self
        }
    }
}

/// One allowed (J, π) combination. `two_j` stores 2J so half-integer
/// spins stay integral; `None` means the spin is unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JpiOption {
    pub two_j: Option<u16>,
    pub parity: Parity,
}

impl JpiOption {
    fn compatible(&self, other: &JpiOption) -> bool {
        let j_ok = match (self.two_j, other.two_j) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        j_ok && self.parity.compatible(other.parity)
    }

    fn merge(&self, other: &JpiOption) -> JpiOption {
        JpiOption {
            two_j: self.two_j.or(other.two_j),
            parity: self.parity.merge(other.parity),
        }
    }

    fn fully_specified(&self) -> bool {
        self.two_j.is_some() && self.parity != Parity::Unknown
    }
}

impl fmt::Display for JpiOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.two_j {
            Some(two_j) if two_j % 2 == 0 => write!(f, "{}", two_j / 2)?,
            Some(two_j) => write!(f, "{two_j}/2")?,
            None => {}
        }
        match self.parity {
            Parity::Plus => write!(f, "+"),
            Parity::Minus => write!(f, "-"),
            Parity::Unknown => Ok(()),
        }
    }
}

/// How two spin-parity constraints relate. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JpiRelation {
    /// Both firm and no option in common.
    Contradiction,
    /// One side missing, or only tentative values disagree.
    Unknown,
    /// Overlapping, at least one side tentative.
    WeakOverlap,
    /// Overlapping, both firm.
    FirmOverlap,
    /// Identical, firm, fully specified.
    Strict,
}

impl JpiRelation {
    pub fn is_firm_overlap(self) -> bool {
        matches!(self, JpiRelation::FirmOverlap | JpiRelation::Strict)
    }
}

/// A set of allowed (J, π) options, possibly tentative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpinParity {
    pub options: Vec<JpiOption>,
    pub tentative: bool,
}

impl SpinParity {
    /// Parse `2+`, `(2+)`, `1/2-,3/2-`, `(1,2)+`, `1:3`, `3/2 TO 7/2`, `(-)`.
    /// Empty text is `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<SpinParity>, ParseError> {
        let text = text.trim().to_ascii_uppercase();
        if text.is_empty() {
            return Ok(None);
        }
        let err = || ParseError::SpinParity(text.clone());

        let tentative = text.contains('(') || text.contains('[');

        // "(1,2)+" distributes the trailing parity over the list
        let mut shared_parity = Parity::Unknown;
        let mut body = text.as_str();
        if let (Some(open), Some(close)) = (text.find('('), text.rfind(')')) {
            if close < open {
                return Err(err());
            }
            let tail = text[close + 1..].trim();
            let inner = &text[open + 1..close];
            let is_list = inner.contains(',') || inner.contains('&') || inner.contains(':') || inner.contains(" TO ");
            if open == 0 && is_list && (tail == "+" || tail == "-") {
                shared_parity = if tail == "+" { Parity::Plus } else { Parity::Minus };
                body = inner;
            }
        }

        let cleaned: String = body
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | '[' | ']'))
            .collect();

        let mut options = Vec::new();
        for element in cleaned.split([',', '&']).map(str::trim) {
            if element.is_empty() {
                return Err(err());
            }
            if let Some((lo, hi)) = split_range(element) {
                options.extend(expand_range(lo, hi).ok_or_else(err)?);
            } else {
                options.push(parse_single(element).ok_or_else(err)?);
            }
        }

        if shared_parity != Parity::Unknown {
            for option in &mut options {
                option.parity = option.parity.merge(shared_parity);
            }
        }

        options.sort();
        options.dedup();
        if options.is_empty() {
            return Err(err());
        }

        Ok(Some(SpinParity { options, tentative }))
    }

    pub fn overlaps(&self, other: &SpinParity) -> bool {
        self.options
            .iter()
            .any(|a| other.options.iter().any(|b| a.compatible(b)))
    }

    pub fn relation(&self, other: &SpinParity) -> JpiRelation {
        let firm = !self.tentative && !other.tentative;
        if !self.overlaps(other) {
            return if firm {
                JpiRelation::Contradiction
            } else {
                JpiRelation::Unknown
            };
        }
        if !firm {
            return JpiRelation::WeakOverlap;
        }
        let fully = self.options.iter().chain(other.options.iter()).all(|o| o.fully_specified());
        if fully && self.options == other.options {
            JpiRelation::Strict
        } else {
            JpiRelation::FirmOverlap
        }
    }

    /// Logical AND of two constraints. `None` when nothing survives.
    pub fn intersect(&self, other: &SpinParity) -> Option<SpinParity> {
        let mut options: Vec<JpiOption> = self
            .options
            .iter()
            .flat_map(|a| {
                other
                    .options
                    .iter()
                    .filter(move |b| a.compatible(b))
                    .map(move |b| a.merge(b))
            })
            .collect();
        options.sort();
        options.dedup();
        if options.is_empty() {
            return None;
        }
        Some(SpinParity {
            options,
            tentative: self.tentative || other.tentative,
        })
    }
}

impl fmt::Display for SpinParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .options
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(",");
        if self.tentative {
            write!(f, "({joined})")
        } else {
            write!(f, "{joined}")
        }
    }
}

fn split_range(element: &str) -> Option<(&str, &str)> {
    if let Some((lo, hi)) = element.split_once(':') {
        return Some((lo.trim(), hi.trim()));
    }
    element
        .split_once(" TO ")
        .map(|(lo, hi)| (lo.trim(), hi.trim()))
}

fn expand_range(lo: &str, hi: &str) -> Option<Vec<JpiOption>> {
    let lo = parse_single(lo)?;
    let hi = parse_single(hi)?;
    let (a, b) = (lo.two_j?, hi.two_j?);
    if a > b || (b - a) % 2 != 0 || ((b - a) / 2) as usize >= MAX_RANGE_OPTIONS {
        return None;
    }
    let parity = if lo.parity == hi.parity {
        lo.parity
    } else {
        lo.parity.merge(hi.parity)
    };
    Some(
        (a..=b)
            .step_by(2)
            .map(|two_j| JpiOption {
                two_j: Some(two_j),
                parity,
            })
            .collect(),
    )
}

fn parse_single(text: &str) -> Option<JpiOption> {
    let text = text.trim();
    let (rest, parity) = if let Some(rest) = text.strip_suffix('+') {
        (rest.trim(), Parity::Plus)
    } else if let Some(rest) = text.strip_suffix('-') {
        (rest.trim(), Parity::Minus)
    } else {
        (text, Parity::Unknown)
    };

    if rest.is_empty() {
        return if parity == Parity::Unknown {
            None
        } else {
            Some(JpiOption { two_j: None, parity })
        };
    }

    let two_j = match rest.split_once('/') {
        Some((num, "2")) => {
            let num: u16 = num.trim().parse().ok()?;
            if num % 2 == 0 {
                return None;
            }
            num
        }
        Some(_) => return None,
        None => rest.parse::<u16>().ok()?.checked_mul(2)?,
    };

    Some(JpiOption {
        two_j: Some(two_j),
        parity,
    })
}
