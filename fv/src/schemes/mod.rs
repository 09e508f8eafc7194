//! Discretisation schemes and their selection by term name from an `fvSchemes` document:
//!
//! ```json
//! {
//!     "ddtSchemes": {"default": "Euler"},
//!     "gradSchemes": {"default": "Gauss linear", "grad(U)": "cellLimited Gauss linear 1"},
//!     "divSchemes": {"default": "none", "div(phi,U)": "bounded Gauss linearUpwind grad(U)"},
//!     "laplacianSchemes": {"default": "Gauss linear corrected"}
//! }
//! ```
//!
//! Terms are looked up by exact name first, then by patterns such as `div(phi,(U|k))`, then
//! by the section's `default`. A `none` default means every term needs its own entry.

mod ddt;
mod gradient;
mod interpolation;
mod sn_grad;

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value as Json;

pub use ddt::{DdtCoeffs, DdtScheme};
pub use gradient::{cell_limit, GradScheme};
pub use interpolation::{
    linear_weights, weighted_interpolate, ConvectionScheme, InterpolationScheme, Limiter,
};
pub use sn_grad::{uncorrected_sn_grad, LaplacianScheme, SnGradScheme};

use crate::dictionary::{as_dict, lookup_btree};
use crate::linalg::parse_kind;
use crate::{Float, FvError, FvResult};

/// Whitespace-separated words of one scheme entry.
pub(crate) struct SchemeTokens<'a> {
    section: Section,
    term: &'a str,
    words: std::iter::Peekable<std::str::SplitWhitespace<'a>>,
}

impl<'a> SchemeTokens<'a> {
    fn new(section: Section, term: &'a str, text: &'a str) -> Self {
        Self {
            section,
            term,
            words: text.split_whitespace().peekable(),
        }
    }

    fn error(&self, message: impl Into<String>) -> FvError {
        FvError::invalid(self.section.to_string(), self.term, message)
    }

    pub(crate) fn word(&mut self) -> FvResult<&'a str> {
        match self.words.next() {
            Some(word) => Ok(word),
            None => Err(self.error("scheme specification ends too early")),
        }
    }

    /// Consumes the next word if it is `word`.
    pub(crate) fn skip(&mut self, word: &str) -> bool {
        let found = self.words.peek() == Some(&word);
        if found {
            self.words.next();
        }
        found
    }

    pub(crate) fn expect(&mut self, word: &str) -> FvResult<()> {
        let next = self.word()?;
        if next != word {
            return Err(self.error(format!("expected '{word}', found '{next}'")));
        }
        Ok(())
    }

    /// A blending coefficient in `[0, 1]`.
    pub(crate) fn coefficient(&mut self) -> FvResult<Float> {
        let word = self.word()?;
        match word.parse::<Float>() {
            Ok(coefficient) if (0. ..=1.).contains(&coefficient) => Ok(coefficient),
            _ => Err(self.error(format!(
                "expected a coefficient between 0 and 1, found '{word}'"
            ))),
        }
    }

    fn finish(mut self) -> FvResult<()> {
        match self.words.next() {
            Some(extra) => Err(self.error(format!("unexpected '{extra}' after scheme"))),
            None => Ok(()),
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::EnumString, strum::Display,
    strum::EnumIter,
)]
pub enum Section {
    #[strum(serialize = "ddtSchemes")]
    Ddt,
    #[strum(serialize = "gradSchemes")]
    Grad,
    #[strum(serialize = "divSchemes")]
    Div,
    #[strum(serialize = "laplacianSchemes")]
    Laplacian,
    #[strum(serialize = "interpolationSchemes")]
    Interpolation,
    #[strum(serialize = "snGradSchemes")]
    SnGrad,
}

/// Scheme entries of every section, kept as text and parsed on lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct FvSchemes {
    sections: BTreeMap<Section, BTreeMap<String, String>>,
}

impl Default for FvSchemes {
    /// First-order time, linear interpolation, corrected gradients.
    fn default() -> Self {
        use strum::IntoEnumIterator;

        Self {
            sections: Section::iter()
                .map(|section| {
                    let default = match section {
                        Section::Ddt => "Euler",
                        Section::Grad | Section::Div => "Gauss linear",
                        Section::Laplacian => "Gauss linear corrected",
                        Section::Interpolation => "linear",
                        Section::SnGrad => "corrected",
                    };
                    (section, BTreeMap::from([("default".to_owned(), default.to_owned())]))
                })
                .collect(),
        }
    }
}

impl FvSchemes {
    /// Reads the sections present in `document`; missing sections keep their defaults.
    pub fn from_json(document: &Json) -> FvResult<Self> {
        use strum::IntoEnumIterator;

        let dict = as_dict(document, "fvSchemes")?;
        let mut schemes = Self::default();
        for key in dict.keys() {
            parse_kind::<Section>("scheme section", key)?;
        }
        for section in Section::iter() {
            let name = section.to_string();
            let Some(entries) = dict.get(&name) else {
                continue;
            };
            let entries = as_dict(entries, &name)?
                .iter()
                .map(|(term, scheme)| match scheme.as_str() {
                    Some(scheme) => Ok((term.clone(), scheme.to_owned())),
                    None => Err(FvError::invalid(&name, term, "expected a scheme string")),
                })
                .collect::<FvResult<BTreeMap<_, _>>>()?;
            schemes.sections.insert(section, entries);
        }
        Ok(schemes)
    }

    pub fn read_file(path: impl AsRef<Path>) -> FvResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| FvError::io(path, error))?;
        Self::from_json(&serde_json::from_str(&text)?)
    }

    pub fn with_scheme(mut self, section: Section, term: &str, scheme: &str) -> Self {
        self.sections
            .entry(section)
            .or_default()
            .insert(term.to_owned(), scheme.to_owned());
        self
    }

    fn tokens<'a>(&'a self, section: Section, term: &'a str) -> FvResult<SchemeTokens<'a>> {
        let entries = self.sections.get(&section);
        let text = entries
            .and_then(|entries| lookup_btree(entries, term).or_else(|| entries.get("default")))
            .filter(|text| text.as_str() != "none")
            .ok_or_else(|| FvError::missing(section.to_string(), term))?;
        Ok(SchemeTokens::new(section, term, text))
    }

    fn parse<'a, S>(
        &'a self,
        section: Section,
        term: &'a str,
        parse: impl FnOnce(&mut SchemeTokens<'a>) -> FvResult<S>,
    ) -> FvResult<S> {
        let mut tokens = self.tokens(section, term)?;
        let scheme = parse(&mut tokens)?;
        tokens.finish()?;
        Ok(scheme)
    }

    pub fn ddt(&self, term: &str) -> FvResult<DdtScheme> {
        self.parse(Section::Ddt, term, |tokens| {
            parse_kind("ddtScheme", tokens.word()?)
        })
    }

    pub fn grad(&self, term: &str) -> FvResult<GradScheme> {
        self.parse(Section::Grad, term, GradScheme::parse)
    }

    /// The convection scheme of `term`; gradients named by `linearUpwind` are looked up in the
    /// gradient section.
    pub fn div(&self, term: &str) -> FvResult<ConvectionScheme> {
        self.parse(Section::Div, term, |tokens| {
            ConvectionScheme::parse(tokens, &|grad_term| self.grad(grad_term))
        })
    }

    pub fn laplacian(&self, term: &str) -> FvResult<LaplacianScheme> {
        self.parse(Section::Laplacian, term, LaplacianScheme::parse)
    }

    pub fn interpolation(&self, term: &str) -> FvResult<InterpolationScheme> {
        self.parse(Section::Interpolation, term, |tokens| {
            InterpolationScheme::parse(tokens, &|grad_term| self.grad(grad_term))
        })
    }

    pub fn sn_grad(&self, term: &str) -> FvResult<SnGradScheme> {
        self.parse(Section::SnGrad, term, SnGradScheme::parse)
    }
}
