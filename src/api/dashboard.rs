//! Server-rendered HTML dashboard.

use std::fmt::Write as _;

use crate::app::{FarmerProfile, Language};
use crate::records::{AnimalRecord, LAST_SEEN_FORMAT};

pub const AI_DISCLAIMER: &str = "Health badges come from detector confidence and motion heuristics. \
They are early-warning hints for the farmer, not a veterinary diagnosis.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Cards,
    Table,
}

impl View {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("table") => View::Table,
            _ => View::Cards,
        }
    }
}

pub struct Dashboard<'a> {
    pub records: &'a [AnimalRecord],
    pub profile: &'a FarmerProfile,
    pub language: Language,
    pub view: View,
    pub vet_link: &'a str,
}

pub fn species_emoji(animal_type: &str) -> &'static str {
    match animal_type.to_ascii_lowercase().as_str() {
        "cow" => "🐄",
        "sheep" => "🐑",
        "horse" => "🐎",
        "dog" => "🐕",
        "cat" => "🐈",
        "bird" => "🐦",
        "elephant" => "🐘",
        "bear" => "🐻",
        "zebra" => "🦓",
        "giraffe" => "🦒",
        _ => "🐾",
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl Dashboard<'_> {
    pub fn render(&self) -> String {
        let header = self.language.header();
        let mut html = String::with_capacity(4096);
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
             <header><h1>{title}</h1><p>{subtitle}</p></header>\n",
            lang = self.language.code(),
            title = escape(header.title),
            subtitle = escape(header.subtitle),
            style = STYLE,
        );
        let _ = write!(
            html,
            "<section class=\"profile\"><b>{}</b> · {} · {} \
             <a class=\"vet\" href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a></section>\n",
            escape(&self.profile.name),
            escape(&self.profile.farm),
            escape(&self.profile.location),
            escape(self.vet_link),
            escape(header.find_vet),
        );
        let _ = write!(
            html,
            "<nav><a href=\"/?lang={lang}\">cards</a> | <a href=\"/?view=table&amp;lang={lang}\">table</a></nav>\n\
             <h2>{} ({})</h2>\n",
            escape(header.animals),
            self.records.len(),
            lang = self.language.code(),
        );

        if self.records.is_empty() {
            html.push_str("<p class=\"empty\">No animals recorded yet.</p>\n");
        } else {
            match self.view {
                View::Cards => self.render_cards(&mut html),
                View::Table => self.render_table(&mut html),
            }
        }

        let _ = write!(
            html,
            "<footer>{}</footer>\n</body>\n</html>\n",
            escape(AI_DISCLAIMER)
        );
        html
    }

    fn render_cards(&self, html: &mut String) {
        html.push_str("<div class=\"cards\">\n");
        for record in self.records {
            let _ = write!(
                html,
                "<div class=\"card\"><div class=\"emoji\">{emoji}</div>\
                 <h3>{name}</h3><p class=\"id\">{id}</p>\
                 <p>{kind} · attendance {attendance}</p><p>last seen {seen}</p>{badge}</div>\n",
                emoji = species_emoji(&record.animal_type),
                name = escape(&record.display_name),
                id = escape(record.animal_id.as_str()),
                kind = escape(&record.animal_type),
                attendance = record.attendance,
                seen = record.last_seen.format(LAST_SEEN_FORMAT),
                badge = self.badge(record),
            );
        }
        html.push_str("</div>\n");
    }

    fn render_table(&self, html: &mut String) {
        html.push_str(
            "<table>\n<tr><th></th><th>ID</th><th>Name</th><th>Type</th>\
             <th>Attendance</th><th>Health</th><th>Last seen</th></tr>\n",
        );
        for record in self.records {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                species_emoji(&record.animal_type),
                escape(record.animal_id.as_str()),
                escape(&record.display_name),
                escape(&record.animal_type),
                record.attendance,
                self.badge(record),
                record.last_seen.format(LAST_SEEN_FORMAT),
            );
        }
        html.push_str("</table>\n");
    }

    fn badge(&self, record: &AnimalRecord) -> String {
        if record.health_status.is_healthy() {
            format!(
                "<span class=\"badge ok\">{}</span>",
                record.health_status.label()
            )
        } else {
            format!(
                "<span class=\"badge alert\">{}</span> <a class=\"vet\" href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a>",
                record.health_status.label(),
                escape(self.vet_link),
                escape(self.language.header().find_vet),
            )
        }
    }
}

const STYLE: &str = "body{font-family:sans-serif;margin:1.5rem;background:#f6f7f2}\
header h1{margin:0}.cards{display:flex;flex-wrap:wrap;gap:1rem}\
.card{background:#fff;border-radius:8px;padding:1rem;width:14rem;box-shadow:0 1px 3px #0002}\
.emoji{font-size:2.5rem}.id{font-family:monospace;color:#666}\
.badge{padding:.2rem .5rem;border-radius:4px;color:#fff}.ok{background:#2e7d32}.alert{background:#c62828}\
table{border-collapse:collapse;background:#fff}td,th{border:1px solid #ccc;padding:.3rem .6rem}\
footer{margin-top:2rem;color:#666;font-size:.85rem}";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AnimalId, HealthStatus};
    use chrono::NaiveDate;

    fn record(id: &str, name: &str, health: HealthStatus) -> AnimalRecord {
        AnimalRecord {
            animal_id: AnimalId::from(id.to_string()),
            animal_type: "Cow".to_string(),
            display_name: name.to_string(),
            attendance: 1,
            health_status: health,
            last_seen: NaiveDate::from_ymd_opt(2024, 5, 17)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        }
    }

    fn render(records: &[AnimalRecord], language: Language, view: View) -> String {
        let profile = FarmerProfile::default();
        Dashboard {
            records,
            profile: &profile,
            language,
            view,
            vet_link: "https://maps.example/?q=a&b",
        }
        .render()
    }

    #[test]
    fn cards_escape_names_and_link_vet_for_sick_animals() {
        let records = vec![
            record("COW_0000aaaa", "<Gauri>", HealthStatus::Healthy),
            record("COW_0000bbbb", "Lali", HealthStatus::NeedsVetSupport),
        ];
        let html = render(&records, Language::English, View::Cards);
        assert!(html.contains("&lt;Gauri&gt;"));
        assert!(!html.contains("<Gauri>"));
        assert!(html.contains("🐄"));
        assert!(html.contains("2024-05-17 09:30:00"));
        assert!(html.contains("badge alert"));
        assert!(html.contains("https://maps.example/?q=a&amp;b"));
    }

    #[test]
    fn table_view_and_hindi_header() {
        let records = vec![record("COW_0000aaaa", "Gauri", HealthStatus::Healthy)];
        let html = render(&records, Language::Hindi, View::Table);
        assert!(html.contains("<table>"));
        assert!(html.contains("lang=\"hi\""));
        assert!(html.contains(Language::Hindi.header().title));
    }

    #[test]
    fn empty_herd_message() {
        let html = render(&[], Language::English, View::Cards);
        assert!(html.contains("No animals recorded yet."));
    }

    #[test]
    fn emoji_fallback() {
        assert_eq!(species_emoji("Sheep"), "🐑");
        assert_eq!(species_emoji("Person"), "🐾");
    }
}
