use tracing::warn;

#[derive(Clone, Copy)]
pub struct KeywordRule {
    pub label: &'static str,
    pub keywords: &'static [&'static str],
}

const TAG_RULES: [KeywordRule; 9] = [
    KeywordRule { label: "Jouef", keywords: &["jouef"] },
    KeywordRule { label: "Lima", keywords: &["lima"] },
    KeywordRule { label: "Hornby", keywords: &["hornby"] },
    KeywordRule { label: "Roco", keywords: &["roco"] },
    KeywordRule { label: "Piko", keywords: &["piko"] },
    KeywordRule { label: "Märklin", keywords: &["marklin", "märklin"] },
    KeywordRule { label: "Fleischmann", keywords: &["fleischmann"] },
    KeywordRule { label: "H0", keywords: &["ho"] },
    KeywordRule { label: "SNCF", keywords: &["sncf"] },
];

// First match wins, so order matters.
const CATEGORY_RULES: [KeywordRule; 5] = [
    KeywordRule {
        label: "Wagons",
        keywords: &[
            "wgon", "wagon", "wagons", "voiture", "voitures", "fourgon", "allège", "remorque",
        ],
    },
    KeywordRule {
        label: "Locomotives",
        keywords: &[
            "locomotive",
            "locomotives",
            "locotracteur",
            "locotender",
            "autorail",
        ],
    },
    KeywordRule {
        label: "Rails",
        keywords: &[
            "trails",
            "rail",
            "aiguillage",
            "voie",
            "rails",
            "aiguillages",
            "voies",
            "croisement",
            "jonction",
            "tjd",
            "heurtoir",
            "heurtoirs",
        ],
    },
    KeywordRule {
        label: "Décor",
        keywords: &["personnages", "personnage", "tunnel", "conteneurs", "bureau"],
    },
    KeywordRule {
        label: "Coffrets",
        keywords: &["coffret", "coffrets"],
    },
];

const TITLE_NOISE: &[&str] = &["Train wagon"];

fn title_words(title: &str) -> Vec<String> {
    title.to_lowercase().split_whitespace().map(str::to_string).collect()
}

fn matches(rule: &KeywordRule, words: &[String]) -> bool {
    rule.keywords
        .iter()
        .any(|keyword| words.iter().any(|word| word == keyword))
}

/// Every tag whose keywords appear as a whole word of the title.
pub fn tags_for(title: &str) -> Vec<&'static str> {
    let words = title_words(title);
    TAG_RULES
        .iter()
        .filter(|rule| matches(rule, &words))
        .map(|rule| rule.label)
        .collect()
}

pub fn category_for(title: &str) -> Option<&'static str> {
    let words = title_words(title);
    let category = CATEGORY_RULES
        .iter()
        .find(|rule| matches(rule, &words))
        .map(|rule| rule.label);
    if category.is_none() {
        warn!(target = "lbc.publish", title, "category_not_found");
    }
    category
}

pub fn clean_title(title: &str) -> String {
    let mut cleaned = title.to_string();
    for noise in TITLE_NOISE {
        cleaned = cleaned.replace(noise, "");
    }
    cleaned.trim().to_string()
}

pub fn description_html(description: &str, url: &str) -> String {
    format!(
        "{}<br/>Disponible également sur <a href='{url}'>leboncoin.fr</a>",
        description.replace('\n', "<br/>")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_whole_words_only() {
        assert_eq!(
            tags_for("Locomotive Jouef BB SNCF HO"),
            vec!["Jouef", "H0", "SNCF"]
        );
        assert_eq!(tags_for("Märklin coffret"), vec!["Märklin"]);
        assert!(tags_for("Limande hornbyX").is_empty());
    }

    #[test]
    fn first_matching_category_wins() {
        assert_eq!(category_for("Coffret wagon Lima"), Some("Wagons"));
        assert_eq!(category_for("Lot de rails Roco"), Some("Rails"));
        assert_eq!(category_for("Maquette bateau"), None);
    }

    #[test]
    fn title_noise_is_stripped() {
        assert_eq!(clean_title("Train wagon citerne Esso "), "citerne Esso");
        assert_eq!(clean_title("Locomotive"), "Locomotive");
    }

    #[test]
    fn description_links_back_to_listing() {
        let html = description_html("Bon état\nBoîte", "https://lbc/ad/1");
        assert_eq!(
            html,
            "Bon état<br/>Boîte<br/>Disponible également sur <a href='https://lbc/ad/1'>leboncoin.fr</a>"
        );
    }
}
