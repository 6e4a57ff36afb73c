//! Parameter strings of the stages.
//!
//! Every parameter type has a `from_tokens` factory over already split
//! tokens; `FromStr` splits the usual comma separated form and delegates.

use std::str::FromStr;

use crate::error::{FrameError, config};
use crate::filterbank::{Filter, FilterShape, MelParams};
use crate::sdc::SdcParams;
use crate::selection::{Pick, SelectionSpec};
use crate::slope::{SlopeContext, SlopeParams};
use crate::window::{WindowFunction, WindowParams};

fn value<T: FromStr>(token: &str, what: &str) -> Result<T, FrameError> {
    token
        .trim()
        .parse()
        .map_err(|_| config(format!("invalid {what} {token:?}")))
}

fn arity(tokens: &[&str], n: usize, what: &str) -> Result<(), FrameError> {
    if tokens.len() != n {
        return Err(config(format!(
            "{what} takes {n} values, got {}: {tokens:?}",
            tokens.len()
        )));
    }
    Ok(())
}

fn split(s: &str) -> Vec<&str> {
    s.split(',').map(str::trim).collect()
}

impl FromStr for WindowFunction {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hamm" | "hamming" => Ok(WindowFunction::Hamming),
            "hann" | "hanning" => Ok(WindowFunction::Hann),
            "rect" | "rectangular" => Ok(WindowFunction::Rectangular),
            "tri" | "triangular" => Ok(WindowFunction::Triangular),
            other => Err(config(format!("unknown window function {other:?}"))),
        }
    }
}

impl WindowParams {
    /// `function, length_ms, shift_ms`
    pub fn from_tokens(tokens: &[&str]) -> Result<Self, FrameError> {
        arity(tokens, 3, "window")?;
        Ok(Self {
            function: tokens[0].parse()?,
            length_ms: value(tokens[1], "window length")?,
            shift_ms: value(tokens[2], "window shift")?,
            remove_dc: false,
        })
    }
}

impl FromStr for WindowParams {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(&split(s))
    }
}

impl MelParams {
    /// `low_hz, high_hz, width_mel, overlap`
    pub fn from_tokens(tokens: &[&str]) -> Result<Self, FrameError> {
        arity(tokens, 4, "mel filter")?;
        Ok(Self {
            low_hz: value(tokens[0], "low frequency")?,
            high_hz: value(tokens[1], "high frequency")?,
            width: value(tokens[2], "filter width")?,
            overlap: value(tokens[3], "filter overlap")?,
            ..Self::default()
        })
    }
}

impl FromStr for MelParams {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(&split(s))
    }
}

/// Explicit filter list, `type,shape,start,end[:type,shape,start,end...]`
/// with type `lin` or `log` and shape `rect` or `tri`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub filters: Vec<Filter>,
}

impl FilterSpec {
    /// One filter: `type, shape, start, end`.
    pub fn filter_from_tokens(tokens: &[&str]) -> Result<Filter, FrameError> {
        arity(tokens, 4, "filter")?;
        let log = match tokens[0] {
            "lin" => false,
            "log" => true,
            other => return Err(config(format!("unknown filter type {other:?}"))),
        };
        let shape = match tokens[1] {
            "rect" => FilterShape::Rectangular,
            "tri" => FilterShape::Triangular,
            other => return Err(config(format!("unknown filter shape {other:?}"))),
        };
        Filter::new(
            value(tokens[2], "filter start")?,
            value(tokens[3], "filter end")?,
            shape,
            log,
        )
    }
}

impl FromStr for FilterSpec {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let filters = s
            .split(':')
            .map(|f| Self::filter_from_tokens(&split(f)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }
}

impl SdcParams {
    /// `d, p, k`
    pub fn from_tokens(tokens: &[&str]) -> Result<Self, FrameError> {
        arity(tokens, 3, "sdc")?;
        Ok(Self {
            d: value(tokens[0], "sdc d")?,
            p: value(tokens[1], "sdc p")?,
            k: value(tokens[2], "sdc k")?,
            include_static: false,
        })
    }
}

impl FromStr for SdcParams {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(&split(s))
    }
}

impl SlopeParams {
    /// `[tirol,] size:order [, size:order ...]`
    pub fn from_tokens(tokens: &[&str]) -> Result<Self, FrameError> {
        let (tirol, rest) = match tokens.split_first() {
            Some((&"tirol", rest)) => (true, rest),
            _ => (false, tokens),
        };
        if rest.is_empty() {
            return Err(config("slope needs at least one context"));
        }
        let contexts = rest
            .iter()
            .map(|t| {
                let (size, order) = t
                    .split_once(':')
                    .ok_or_else(|| config(format!("slope context {t:?} is not size:order")))?;
                Ok(SlopeContext::new(
                    value(size, "slope context size")?,
                    value(order, "slope order")?,
                ))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Ok(Self { tirol, contexts })
    }
}

impl FromStr for SlopeParams {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(&split(s))
    }
}

impl SelectionSpec {
    /// Each token is `E` (energy), an index or an inclusive range `a-b`.
    pub fn from_tokens(tokens: &[&str]) -> Result<Self, FrameError> {
        let mut picks = Vec::new();
        for &t in tokens {
            if t.eq_ignore_ascii_case("e") {
                picks.push(Pick::Energy);
            } else if let Some((a, b)) = t.split_once('-') {
                let a: usize = value(a, "selection start")?;
                let b: usize = value(b, "selection end")?;
                if a > b {
                    return Err(config(format!("selection range {t:?} is reversed")));
                }
                picks.extend((a..=b).map(Pick::Index));
            } else {
                picks.push(Pick::Index(value(t, "selection index")?));
            }
        }
        if picks.is_empty() {
            return Err(config("selection is empty"));
        }
        Ok(Self { picks })
    }
}

impl FromStr for SelectionSpec {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(&split(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let w: WindowParams = "hann, 32, 16".parse().unwrap();
        assert_eq!(w.function, WindowFunction::Hann);
        assert_eq!(w.length_ms, 32.0);
        assert_eq!(w.shift_ms, 16.0);
        assert!("hamm,25".parse::<WindowParams>().is_err());
        assert!("blackman,25,10".parse::<WindowParams>().is_err());
    }

    #[test]
    fn test_mel_default_string() {
        let m: MelParams = "188,6071,226.79982,0.5".parse().unwrap();
        assert_eq!(m, MelParams::default());
    }

    #[test]
    fn test_filters() {
        let spec: FilterSpec = "lin,rect,0,3:log,tri,2,6".parse().unwrap();
        assert_eq!(spec.filters.len(), 2);
        assert_eq!(spec.filters[0].shape(), FilterShape::Rectangular);
        assert!(!spec.filters[0].is_log());
        assert!(spec.filters[1].is_log());
        assert_eq!(spec.filters[1].end(), 6);
        assert!("lin,oval,0,3".parse::<FilterSpec>().is_err());
        assert!("lin,rect,4,3".parse::<FilterSpec>().is_err());
    }

    #[test]
    fn test_sdc() {
        assert_eq!("1,3,7".parse::<SdcParams>().unwrap(), SdcParams::default());
        assert!("1,x,7".parse::<SdcParams>().is_err());
    }

    #[test]
    fn test_slope() {
        let s: SlopeParams = "tirol,5:1,7:2".parse().unwrap();
        assert!(s.tirol);
        assert_eq!(s.contexts, vec![SlopeContext::new(5, 1), SlopeContext::new(7, 2)]);
        let s: SlopeParams = "3:1".parse().unwrap();
        assert!(!s.tirol);
        assert!("tirol".parse::<SlopeParams>().is_err());
        assert!("5-1".parse::<SlopeParams>().is_err());
    }

    #[test]
    fn test_selection() {
        let s: SelectionSpec = "E,1-3,7".parse().unwrap();
        assert_eq!(
            s.picks,
            vec![Pick::Energy, Pick::Index(1), Pick::Index(2), Pick::Index(3), Pick::Index(7)]
        );
        assert!(s.needs_energy());
        assert!("3-1".parse::<SelectionSpec>().is_err());
    }
}
