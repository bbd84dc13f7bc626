//! Monthly archive naming

use chrono::{Datelike, NaiveDate};

use crate::config::ArchiveSettings;

const DANISH_MONTHS: [&str; 12] = [
    "Januar", "Februar", "Marts", "April", "Maj", "Juni", "Juli", "August", "September", "Oktober",
    "November", "December",
];

const ENGLISH_MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December",
];

/// Where the dated archive copy of a file goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub library: String,
    /// Folder inside the library, e.g. `Historik/2024/Marts`
    pub folder: String,
    /// e.g. `DKPlan_Marts_2024.xlsx`
    pub filename: String,
}

impl ArchiveTarget {
    /// Library-relative folder
    pub fn remote_folder(&self) -> String {
        format!("{}/{}", self.library, self.folder)
    }
}

/// Capitalized month name in the configured locale
pub fn month_name(month: u32, locale: &str) -> &'static str {
    let table = match locale {
        "en" => &ENGLISH_MONTHS,
        _ => &DANISH_MONTHS,
    };
    table[(month.clamp(1, 12) - 1) as usize]
}

/// Archive location for a copy made on `date`; `extension` includes the dot
pub fn archive_target(date: NaiveDate, settings: &ArchiveSettings, extension: &str) -> ArchiveTarget {
    let month = month_name(date.month(), &settings.month_locale);
    let year = date.year();

    ArchiveTarget {
        library: settings.library.clone(),
        folder: format!("{}/{}/{}", settings.folder, year, month),
        filename: format!("{}_{}_{}{}", settings.file_prefix, month, year, extension),
    }
}
