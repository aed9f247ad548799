use chrono::{Days, NaiveDate};

use super::error::{EftsError, Result};
use super::search::SearchParams;

/// Form term meaning "primary documents only", used when no form is requested.
pub const PRIMARY_DOCUMENTS: &str = "-0";

/// First day covered by full-text search.
pub fn earliest_filing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2001, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Filing-date constraint of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFilter {
    Single(NaiveDate),
    /// Inclusive bounds
    Range(NaiveDate, NaiveDate),
    /// Any of the listed days
    List(Vec<NaiveDate>),
}

impl DateFilter {
    /// Parses a `YYYY-MM-DD` pair into an inclusive range.
    pub fn parse_range(start: &str, end: &str) -> Result<Self> {
        Ok(DateFilter::Range(
            NaiveDate::parse_from_str(start, "%Y-%m-%d")?,
            NaiveDate::parse_from_str(end, "%Y-%m-%d")?,
        ))
    }

    /// Collapses the filter into disjoint inclusive ranges. Listed days that are adjacent
    /// merge into a single range.
    pub fn ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        match self {
            DateFilter::Single(day) => vec![(*day, *day)],
            DateFilter::Range(start, end) => vec![(*start, *end)],
            DateFilter::List(days) => {
                let mut days = days.clone();
                days.sort();
                days.dedup();

                let mut ranges: Vec<(NaiveDate, NaiveDate)> = Vec::new();
                for day in days {
                    match ranges.last_mut() {
                        Some((_, end)) if end.checked_add_days(Days::new(1)) == Some(day) => {
                            *end = day;
                        }
                        _ => ranges.push((day, day)),
                    }
                }
                ranges
            }
        }
    }
}

/// Logical request handed to [`Efts::query`](crate::Efts::query).
///
/// Every list is a logical OR. Nothing here is sent as-is: [`QueryFilter::to_search_params`]
/// expands it into one concrete [`SearchParams`] per date range.
///
/// # Examples
///
/// ```rust
/// use chrono::NaiveDate;
/// use eftskit::QueryFilter;
///
/// let filter = QueryFilter::new()
///     .with_cik(320193)
///     .with_form_type("10-K")
///     .with_date_range(
///         NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
///         NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
///     );
/// assert!(filter.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub ciks: Option<Vec<u64>>,
    /// Company name, resolved to a CIK before planning. Cannot be combined with `ciks`.
    pub name: Option<String>,
    pub form_types: Option<Vec<String>>,
    pub dates: Option<DateFilter>,
    /// Full-text phrase. Wrap in double quotes for an exact phrase.
    pub text: Option<String>,
    pub locations: Option<Vec<String>>,
    /// Whether requesting "S-1" also matches "S-1/A". Defaults to false (exact form matching).
    pub include_amendments: bool,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cik(mut self, cik: u64) -> Self {
        self.ciks = Some(vec![cik]);
        self
    }

    pub fn with_ciks(mut self, ciks: Vec<u64>) -> Self {
        self.ciks = Some(ciks);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_form_type(mut self, form_type: impl Into<String>) -> Self {
        self.form_types = Some(vec![form_type.into()]);
        self
    }

    pub fn with_form_types(mut self, form_types: Vec<String>) -> Self {
        self.form_types = Some(form_types);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.dates = Some(DateFilter::Single(date));
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.dates = Some(DateFilter::Range(start, end));
        self
    }

    pub fn with_dates(mut self, dates: Vec<NaiveDate>) -> Self {
        self.dates = Some(DateFilter::List(dates));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations = Some(vec![location.into()]);
        self
    }

    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.locations = Some(locations);
        self
    }

    /// Set whether to include amendment forms automatically.
    ///
    /// When false (default), requesting "S-1" excludes "S-1/A" filings.
    /// When true, the API's own matching applies and amendments are returned too.
    pub fn with_include_amendments(mut self, include_amendments: bool) -> Self {
        self.include_amendments = include_amendments;
        self
    }

    /// Rejects contradictory or empty constraints. Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.ciks.is_some() && self.name.is_some() {
            return Err(EftsError::InvalidFilter(
                "Provide either a name or CIKs, not both".to_string(),
            ));
        }
        if matches!(self.ciks, Some(ref ciks) if ciks.is_empty()) {
            return Err(EftsError::InvalidFilter("CIK list is empty".to_string()));
        }
        if matches!(self.name, Some(ref name) if name.trim().is_empty()) {
            return Err(EftsError::InvalidFilter("Name is empty".to_string()));
        }
        if matches!(self.form_types, Some(ref forms) if forms.is_empty() || forms.iter().any(|f| f.trim().is_empty()))
        {
            return Err(EftsError::InvalidFilter(
                "Form type list is empty or contains a blank entry".to_string(),
            ));
        }
        if matches!(self.locations, Some(ref locations) if locations.is_empty()) {
            return Err(EftsError::InvalidFilter("Location list is empty".to_string()));
        }
        match self.dates {
            Some(DateFilter::List(ref days)) if days.is_empty() => {
                return Err(EftsError::InvalidFilter("Date list is empty".to_string()));
            }
            Some(DateFilter::Range(start, end)) if start > end => {
                return Err(EftsError::InvalidFilter(format!(
                    "Date range starts after it ends: {} > {}",
                    start, end
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Form terms actually sent: the requested forms plus amendment exclusions, or the
    /// primary-documents default.
    pub fn expanded_forms(&self) -> Vec<String> {
        match self.form_types {
            Some(ref forms) => {
                let mut expanded = Vec::with_capacity(forms.len() * 2);
                for form in forms {
                    push_unique(&mut expanded, form.trim().to_string());
                    if !self.include_amendments {
                        if let Some(exclusion) = amendment_exclusion(form.trim()) {
                            push_unique(&mut expanded, exclusion);
                        }
                    }
                }
                expanded
            }
            None => vec![PRIMARY_DOCUMENTS.to_string()],
        }
    }

    /// Builds the root search parameters, one per disjoint date range.
    ///
    /// `ciks` overrides the filter's own CIKs (used once a name has been resolved). `today`
    /// closes the default date range.
    pub fn to_search_params(
        &self,
        ciks: Option<&[u64]>,
        today: NaiveDate,
    ) -> Result<Vec<SearchParams>> {
        self.validate()?;

        let ciks: Vec<String> = ciks
            .or(self.ciks.as_deref())
            .unwrap_or_default()
            .iter()
            .map(|cik| format!("{:010}", cik))
            .collect();
        let forms = self.expanded_forms();
        let ranges = match self.dates {
            Some(ref dates) => dates.ranges(),
            None => vec![(earliest_filing_date(), today)],
        };

        Ok(ranges
            .into_iter()
            .map(|(start, end)| SearchParams {
                query: self.text.clone().filter(|t| !t.trim().is_empty()),
                ciks: ciks.clone(),
                forms: forms.clone(),
                start_date: start,
                end_date: end,
                location_codes: self.locations.clone().unwrap_or_default(),
            })
            .collect())
    }
}

/// Exclusion that turns a form term into an exact match, e.g. `10-K` → `-10-K/A`.
///
/// Negated terms and amendment forms need none.
pub fn amendment_exclusion(form: &str) -> Option<String> {
    if form.starts_with('-') || form.ends_with("/A") {
        None
    } else {
        Some(format!("-{}/A", form))
    }
}

pub(crate) fn push_unique(forms: &mut Vec<String>, form: String) {
    if !forms.contains(&form) {
        forms.push(form);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_name_and_cik_are_exclusive() {
        let filter = QueryFilter::new().with_cik(320193).with_name("Apple");
        assert!(matches!(filter.validate(), Err(EftsError::InvalidFilter(_))));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let filter = QueryFilter::new().with_date_range(day(2024, 2, 1), day(2024, 1, 1));
        assert!(matches!(filter.validate(), Err(EftsError::InvalidFilter(_))));
    }

    #[test]
    fn test_default_forms_are_primary_documents() {
        assert_eq!(QueryFilter::new().expanded_forms(), vec!["-0"]);
    }

    #[test]
    fn test_exact_form_matching_adds_amendment_exclusions() {
        let filter = QueryFilter::new().with_form_types(vec![
            "10-K".to_string(),
            "S-1/A".to_string(),
            "-8-K".to_string(),
        ]);
        assert_eq!(
            filter.expanded_forms(),
            vec!["10-K", "-10-K/A", "S-1/A", "-8-K"]
        );

        let filter = QueryFilter::new()
            .with_form_type("10-K")
            .with_include_amendments(true);
        assert_eq!(filter.expanded_forms(), vec!["10-K"]);
    }

    #[test]
    fn test_date_list_collapses_into_runs() {
        let dates = DateFilter::List(vec![
            day(2024, 1, 5),
            day(2024, 1, 1),
            day(2024, 1, 2),
            day(2024, 1, 2),
        ]);
        assert_eq!(
            dates.ranges(),
            vec![
                (day(2024, 1, 1), day(2024, 1, 2)),
                (day(2024, 1, 5), day(2024, 1, 5))
            ]
        );
    }

    #[test]
    fn test_search_params_defaults() {
        let filter = QueryFilter::new().with_ciks(vec![320193, 789019]);
        let roots = filter.to_search_params(None, day(2025, 6, 30)).unwrap();

        assert_eq!(roots.len(), 1);
        let root = &roots[0];
        assert_eq!(root.ciks, vec!["0000320193", "0000789019"]);
        assert_eq!(root.forms, vec!["-0"]);
        assert_eq!(root.start_date, day(2001, 1, 1));
        assert_eq!(root.end_date, day(2025, 6, 30));
    }

    #[test]
    fn test_resolved_ciks_override() {
        let filter = QueryFilter::new()
            .with_name("Apple")
            .with_date(day(2024, 3, 1))
            .with_location("CA");
        let roots = filter
            .to_search_params(Some(&[320193]), day(2025, 6, 30))
            .unwrap();

        assert_eq!(roots[0].ciks, vec!["0000320193"]);
        assert_eq!(roots[0].start_date, roots[0].end_date);
        assert_eq!(roots[0].location_codes, vec!["CA"]);
    }

    #[test]
    fn test_parse_range() {
        let dates = DateFilter::parse_range("2023-01-01", "2023-03-31").unwrap();
        assert_eq!(dates, DateFilter::Range(day(2023, 1, 1), day(2023, 3, 31)));
        assert!(DateFilter::parse_range("2023-13-01", "2023-03-31").is_err());
    }
}
