use super::error::{EftsError, Result};
use super::search::Hit;

/// Archive locations of the filing a search hit belongs to.
///
/// Derived from the hit on demand and never stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReference {
    /// CIK without leading zeros, as used in archive paths
    pub cik: String,
    /// Dashed accession number, e.g. `0000320193-23-000106`
    pub accession_number: String,
    /// Full submission text file
    pub url: String,
    /// The matched document inside the submission
    pub document_url: String,
}

#[derive(Debug, Clone, Copy)]
enum UrlType<'a> {
    TextFiling,
    FilingContent(&'a str),
}

impl SubmissionReference {
    /// Resolves `hit` against `archives_url`.
    ///
    /// # Errors
    ///
    /// Returns `EftsError::InvalidResponse` if the hit carries no CIK or its id is not
    /// `accession_number:file_name`.
    pub fn from_hit(hit: &Hit, archives_url: &str) -> Result<Self> {
        let (accession_number, file_name) = match hit.id.split_once(':') {
            Some((acc, file)) if !acc.is_empty() && !file.is_empty() => (acc, file),
            _ => {
                return Err(EftsError::InvalidResponse(format!(
                    "Invalid filing ID format {:?}. Expected 'accession_number:filename'",
                    hit.id
                )));
            }
        };
        let cik = hit
            .primary_cik()
            .map(trim_cik)
            .filter(|cik| !cik.is_empty())
            .ok_or_else(|| {
                EftsError::InvalidResponse(format!("Hit {} has no CIK", hit.id))
            })?;

        Ok(Self {
            url: build_url(archives_url, UrlType::TextFiling, &cik, accession_number),
            document_url: build_url(
                archives_url,
                UrlType::FilingContent(file_name),
                &cik,
                accession_number,
            ),
            cik,
            accession_number: accession_number.to_string(),
        })
    }
}

fn build_url(archives_url: &str, url_type: UrlType<'_>, cik: &str, acc_no: &str) -> String {
    let formatted_acc = acc_no.replace('-', "");
    match url_type {
        // /Archives/edgar/data/CIK/ACC_NO_NO_DASHES/ACC_NO_WITH_DASHES.txt
        UrlType::TextFiling => format!(
            "{}/data/{}/{}/{}.txt",
            archives_url, cik, formatted_acc, acc_no
        ),
        UrlType::FilingContent(filename) => format!(
            "{}/data/{}/{}/{}",
            archives_url, cik, formatted_acc, filename
        ),
    }
}

fn trim_cik(cik: &str) -> String {
    let trimmed = cik.trim().trim_start_matches('0');
    if trimmed.is_empty() && !cik.trim().is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
