use chrono::NaiveDate;

use crate::error::{Error, Result};

pub const DATE_LAYOUT: &str = "%Y-%m-%d";

/// Time bucket size used by the statistics API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Granularity {
    #[default]
    Unspecified,
    Day,
    Hour,
    Week,
}

impl Granularity {
    /// Wire value. Anything that is not hour or week is sent as `day`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Week => "week",
            Granularity::Day | Granularity::Unspecified => "day",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day" => Ok(Granularity::Day),
            "hour" => Ok(Granularity::Hour),
            "week" => Ok(Granularity::Week),
            other => Err(Error::Validation(format!(
                "unknown granularity {other:?}, expected day, hour or week"
            ))),
        }
    }
}

/// Description of one statistics query. Sub-queries are built as narrowed
/// copies and never mutate the filter they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub timezone: Option<String>,
    pub limit: u32,
    pub granularity: Granularity,
    pub sources: Vec<String>,
    pub language_codes: Vec<String>,
}

impl Filter {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Copy of this filter narrowed to `[start, end)` and a single source.
    pub fn narrowed(&self, start: NaiveDate, end: NaiveDate, source: &str) -> Self {
        Self {
            from: Some(start),
            to: Some(end),
            sources: vec![source.to_string()],
            ..self.clone()
        }
    }

    /// Both bounds must be present and `from` strictly before `to`.
    pub fn validated_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let (from, to) = match (self.from, self.to) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                return Err(Error::Validation(
                    "both \"from\" and \"to\" must be set".to_string(),
                ))
            }
        };
        if from == to {
            return Err(Error::Validation(
                "\"from\" and \"to\" are equal".to_string(),
            ));
        }
        if from > to {
            return Err(Error::Validation(format!(
                "\"from\" ({from}) is after \"to\" ({to})"
            )));
        }
        Ok((from, to))
    }

    /// Wire query parameters. Zero-valued fields are left out entirely.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();

        if let Some(from) = self.from {
            q.push(("from", from.format(DATE_LAYOUT).to_string()));
        }
        if let Some(to) = self.to {
            q.push(("to", to.format(DATE_LAYOUT).to_string()));
        }
        if let Some(tz) = self.timezone.as_deref().filter(|tz| !tz.is_empty()) {
            q.push(("timezone", tz.to_string()));
        }
        if self.granularity != Granularity::Unspecified {
            q.push(("granularity", self.granularity.as_str().to_string()));
        }
        if self.limit != 0 {
            q.push(("limit", self.limit.to_string()));
        }
        for source in &self.sources {
            q.push(("sources", source.clone()));
        }
        for code in &self.language_codes {
            q.push(("language_codes", code.clone()));
        }

        q
    }
}

/// Query projection for an optional filter; an absent filter projects to nothing.
pub fn query(filter: Option<&Filter>) -> Vec<(&'static str, String)> {
    filter.map(Filter::query).unwrap_or_default()
}
