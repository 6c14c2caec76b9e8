// 📅 Competence - the billing month ("YYYY-MM")

use super::error::BillingError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Competence {
    year: i32,
    month: u32,
}

impl Competence {
    fn checked(year: i32, month: u32) -> Result<Self, &'static str> {
        if !(1..=9999).contains(&year) {
            return Err("year must be between 1 and 9999");
        }
        if !(1..=12).contains(&month) {
            return Err("month must be between 1 and 12");
        }
        Ok(Competence { year, month })
    }

    /// Parse `YYYY-MM` (a single-digit month is accepted and canonicalized).
    pub fn parse(input: &str) -> Result<Self, BillingError> {
        let trimmed = input.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| invalid(input, "expected format YYYY-MM"))?;

        if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(input, "year must have 4 digits"));
        }
        if month.is_empty() || month.len() > 2 || !month.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(input, "month must have 1 or 2 digits"));
        }

        let year: i32 = year.parse().map_err(|_| invalid(input, "unparsable year"))?;
        let month: u32 = month.parse().map_err(|_| invalid(input, "unparsable month"))?;

        Self::checked(year, month).map_err(|reason| invalid(input, reason))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // year/month validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let first = self.first_day();
        first
            .checked_add_months(chrono::Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// 28..=31, leap years included
    pub fn days_in_month(&self) -> u32 {
        self.last_day().day()
    }
}

fn invalid(input: &str, reason: &str) -> BillingError {
    BillingError::InvalidCompetence {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for Competence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Competence {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Competence::parse(s)
    }
}

impl TryFrom<String> for Competence {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Competence::parse(&value)
    }
}

impl From<Competence> for String {
    fn from(value: Competence) -> Self {
        value.to_string()
    }
}
