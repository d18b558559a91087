//! English inflection for table and foreign key naming conventions

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("mouse", "mice"),
    ("tooth", "teeth"),
    ("foot", "feet"),
];

const UNCOUNTABLE: &[&str] = &["equipment", "information", "rice", "money", "species", "series", "fish", "sheep", "news"];

/// Simple pluralization (English-centric)
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, plural)) = IRREGULAR.iter().find(|(singular, _)| lower.ends_with(singular)) {
        return format!("{}{}", &word[..word.len() - singular.len()], plural);
    }
    if lower.ends_with('y') && !ends_with_any(&lower, &["ay", "ey", "iy", "oy", "uy"]) {
        format!("{}ies", &word[..word.len() - 1])
    } else if ends_with_any(&lower, &["s", "sh", "ch", "x", "z"]) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Simple singularization (English-centric)
pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, plural)) = IRREGULAR.iter().find(|(_, plural)| lower.ends_with(plural)) {
        return format!("{}{}", &word[..word.len() - plural.len()], singular);
    }
    if lower.ends_with("ies") && word.len() > 3 {
        format!("{}y", &word[..word.len() - 3])
    } else if ends_with_any(&lower, &["sses", "ches", "shes", "xes", "zes"]) {
        word[..word.len() - 2].to_string()
    } else if lower.ends_with('s') && !lower.ends_with("ss") && word.len() > 1 {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// `DoctorPatient` -> `doctor_patient`
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Last segment of a qualified type name: `app::models::Person` -> `Person`
pub fn short_type_name(type_name: &str) -> &str {
    type_name
        .rsplit(|c| c == '.' || c == ':')
        .next()
        .unwrap_or(type_name)
}

/// Conventional table name for an entity type: `Person` -> `people`
pub fn table_name_for(type_name: &str) -> String {
    pluralize(&underscore(short_type_name(type_name)))
}

/// Conventional foreign key referencing a table: `people` -> `person_id`
pub fn foreign_key_for(table_name: &str) -> String {
    let table = table_name.rsplit('.').next().unwrap_or(table_name);
    format!("{}_id", singularize(table).to_lowercase())
}

fn ends_with_any(word: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| word.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("sales_person"), "sales_people");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("news"), "news");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("houses"), "house");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("class"), "class");
        assert_eq!(singularize("doctors_patients"), "doctors_patient");
    }

    #[test]
    fn test_table_and_key_conventions() {
        assert_eq!(table_name_for("Person"), "people");
        assert_eq!(table_name_for("app.models.Address"), "addresses");
        assert_eq!(table_name_for("crate::models::LineItem"), "line_items");
        assert_eq!(foreign_key_for("people"), "person_id");
        assert_eq!(foreign_key_for("USERS"), "user_id");
        assert_eq!(foreign_key_for("public.doctors"), "doctor_id");
    }

    #[test]
    fn test_non_ascii_words_keep_their_prefix() {
        assert_eq!(pluralize("İPERSON"), "İpeople");
        assert_eq!(singularize("İcategories"), "İcategory");
        assert_eq!(singularize("ÅSS"), "ÅSS");
        assert_eq!(pluralize("straße"), "straßes");
    }
}
