// 🦠 Disease catalog - static per run
//
// Diseases aren't scraped; each stats source is paired with one of these.

use crate::model::{Disease, DiseaseLink};

pub const COVID_19: &str = "COVID-19";
pub const H1N1: &str = "H1N1";

pub fn covid_19() -> Disease {
    Disease {
        id: COVID_19.to_string(),
        name: "COVID-19".to_string(),
        long_name: Some("Coronavirus disease 2019".to_string()),
        description: "COVID-19 is a respiratory disease caused by the SARS-CoV-2 coronavirus."
            .to_string(),
        reinfectable: false,
        popularity: 1,
        links: vec![
            DiseaseLink::global(
                "https://www.who.int/emergencies/diseases/novel-coronavirus-2019",
                "WHO situation reports",
            ),
            DiseaseLink::scoped(
                "AU",
                "https://www.health.gov.au/health-alerts/covid-19",
                "Australian Government health alerts",
            ),
            DiseaseLink::scoped(
                "AU-NSW",
                "https://www.health.nsw.gov.au/Infectious/covid-19",
                "NSW Health updates",
            ),
        ],
    }
}

pub fn h1n1() -> Disease {
    Disease {
        id: H1N1.to_string(),
        name: "Swine Flu".to_string(),
        long_name: Some("Swine Influenza".to_string()),
        description: "Swine influenza is an infection caused by any one of several types of swine influenza viruses."
            .to_string(),
        reinfectable: false,
        popularity: 2,
        links: vec![DiseaseLink::global(
            "https://en.wikipedia.org/wiki/2009_swine_flu_pandemic",
            "2009 pandemic overview",
        )],
    }
}

pub fn all() -> Vec<Disease> {
    vec![covid_19(), h1n1()]
}

/// Look a disease up by id (case-insensitive).
pub fn find(id: &str) -> Option<Disease> {
    all().into_iter().find(|d| d.id.eq_ignore_ascii_case(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find() {
        assert_eq!(find("covid-19").unwrap().id, COVID_19);
        assert_eq!(find("H1N1").unwrap().long_name.as_deref(), Some("Swine Influenza"));
        assert!(find("measles").is_none());
    }

    #[test]
    fn test_popularity_ranks_are_unique() {
        let mut ranks: Vec<_> = all().iter().map(|d| d.popularity).collect();
        ranks.sort();
        ranks.dedup();
        assert_eq!(ranks.len(), all().len());
    }
}
