//! Cell-level cleaning for spreadsheet exports.
//!
//! Exports arrive with every cell stringified, spreadsheet artifacts (ages
//! rendered as `1900-01-DD` dates), placeholder markers (`INCLUIR`) and
//! free-text labels that changed wording between years. Each function here
//! takes one cell and returns either a clean value or `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("static regex"));
static SPREADSHEET_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^1900-01-(\d{2})").expect("static regex"));

/// Marker used by the program office for "value pending"
const PENDING_MARKER: &str = "INCLUIR";

/// Lowercase, trim, strip accents and replace spaces with `_`
pub fn standardize_column_name(name: &str) -> String {
    fold_accents(name.trim())
        .to_lowercase()
        .replace(' ', "_")
}

/// NFD-decompose and drop combining marks ("Gênero" -> "Genero")
pub fn fold_accents(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Text content of a cell, with the usual null spellings mapped to `None`
pub fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    match text.as_str() {
        "" | "nan" | "NaN" | "None" | "null" | "<NA>" | "NaT" => None,
        _ => Some(text),
    }
}

/// First run of digits, e.g. `"RA-1234"` -> 1234
pub fn clean_entity_key(value: &Value) -> Option<u64> {
    let text = cell_text(value)?;
    DIGITS
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `ALFA` is phase 0; otherwise the first run of digits (`"Fase 3"`, `"3A"`)
pub fn clean_phase(value: &Value) -> Option<i64> {
    let text = cell_text(value)?.to_uppercase();
    if text.contains("ALFA") {
        return Some(0);
    }
    DIGITS
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Ages sometimes come through as `1900-01-DD` dates where DD is the age
pub fn clean_age(value: &Value) -> Option<i64> {
    let text = cell_text(value)?;
    if let Some(day) = SPREADSHEET_DATE.captures(&text).and_then(|c| c.get(1)) {
        return day.as_str().parse().ok();
    }
    parse_decimal(&text).map(|v| v.trunc() as i64)
}

/// Source spellings of gender collapsed to `F`/`M`; unrecognized text passes through
pub fn clean_gender(value: &Value) -> Option<String> {
    let text = cell_text(value)?;
    let mapped = match text.as_str() {
        "Menina" | "Feminino" | "F" => "F",
        "Menino" | "Masculino" | "M" => "M",
        _ => return Some(text),
    };
    Some(mapped.to_string())
}

/// Stone labels lowercased and accent-folded; `INCLUIR` means not assigned yet
pub fn clean_stone(value: &Value) -> Option<String> {
    let text = cell_text(value)?;
    if text == PENDING_MARKER {
        return None;
    }
    Some(fold_accents(&text).to_lowercase())
}

/// Institution free text bucketed into public/private/scholarship/other
pub fn clean_institution(value: &Value) -> Option<String> {
    let text = cell_text(value)?;
    let bucket = match text.as_str() {
        "Escola Pública" | "Pública" => "public",
        "Rede Decisão" | "Escola JP II" | "Privada" => "private",
        "Privada - Programa de Apadrinhamento"
        | "Privada - Programa de apadrinhamento"
        | "Privada *Parcerias com Bolsa 100%"
        | "Privada - Pagamento por *Empresa Parceira"
        | "Bolsista Universitário *Formado (a)" => "scholarship",
        "Concluiu o 3º EM" | "Nenhuma das opções acima" => "other",
        _ => return Some(text),
    };
    Some(bucket.to_string())
}

/// Numeric cell; accepts decimal commas and rejects the pending marker
pub fn clean_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        other => {
            let text = cell_text(other)?;
            if text == PENDING_MARKER {
                return None;
            }
            parse_decimal(&text)
        }
    }
}

/// Integer cell; tolerates `"-1.0"` style float text
pub fn clean_integer(value: &Value) -> Option<i64> {
    let v = clean_decimal(value)?;
    if v.fract() == 0.0 {
        Some(v as i64)
    } else {
        None
    }
}

fn parse_decimal(text: &str) -> Option<f64> {
    let normalized = text.replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standardize_column_name() {
        assert_eq!(standardize_column_name("  Gênero "), "genero");
        assert_eq!(standardize_column_name("Instituição de ensino"), "instituicao_de_ensino");
        assert_eq!(standardize_column_name("INDE 2023"), "inde_2023");
    }

    #[test]
    fn test_cell_text_null_spellings() {
        assert_eq!(cell_text(&json!(null)), None);
        assert_eq!(cell_text(&json!("nan")), None);
        assert_eq!(cell_text(&json!("  ")), None);
        assert_eq!(cell_text(&json!(" x ")), Some("x".to_string()));
    }

    #[test]
    fn test_clean_entity_key() {
        assert_eq!(clean_entity_key(&json!("RA-1234")), Some(1234));
        assert_eq!(clean_entity_key(&json!(77)), Some(77));
        assert_eq!(clean_entity_key(&json!("no digits")), None);
    }

    #[test]
    fn test_clean_phase() {
        assert_eq!(clean_phase(&json!("ALFA")), Some(0));
        assert_eq!(clean_phase(&json!("Fase 7")), Some(7));
        assert_eq!(clean_phase(&json!("3A")), Some(3));
        assert_eq!(clean_phase(&json!(null)), None);
    }

    #[test]
    fn test_clean_age_handles_spreadsheet_dates() {
        assert_eq!(clean_age(&json!("1900-01-11 00:00:00")), Some(11));
        assert_eq!(clean_age(&json!("14.0")), Some(14));
        assert_eq!(clean_age(&json!(9)), Some(9));
    }

    #[test]
    fn test_clean_gender_and_stone() {
        assert_eq!(clean_gender(&json!("Menina")), Some("F".to_string()));
        assert_eq!(clean_gender(&json!("Masculino")), Some("M".to_string()));
        assert_eq!(clean_gender(&json!("Outro")), Some("Outro".to_string()));
        assert_eq!(clean_stone(&json!("Ágata")), Some("agata".to_string()));
        assert_eq!(clean_stone(&json!("Agata")), Some("agata".to_string()));
        assert_eq!(clean_stone(&json!("INCLUIR")), None);
    }

    #[test]
    fn test_clean_institution_buckets() {
        assert_eq!(clean_institution(&json!("Escola Pública")), Some("public".to_string()));
        assert_eq!(clean_institution(&json!("Escola JP II")), Some("private".to_string()));
        assert_eq!(
            clean_institution(&json!("Privada *Parcerias com Bolsa 100%")),
            Some("scholarship".to_string())
        );
    }

    #[test]
    fn test_clean_decimal_and_integer() {
        assert_eq!(clean_decimal(&json!("7,5")), Some(7.5));
        assert_eq!(clean_decimal(&json!("INCLUIR")), None);
        assert_eq!(clean_integer(&json!("-1.0")), Some(-1));
        assert_eq!(clean_integer(&json!("-1.5")), None);
    }
}
