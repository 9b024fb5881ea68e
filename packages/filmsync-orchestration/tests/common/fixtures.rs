//! Test fixture generators
//!
//! SQL templates carry a `/* marker */` comment so `ScriptedSource` can
//! route them; the rest mirrors the production queries.

use filmsync_orchestration::{EtlConfig, RetryPolicy};
use filmsync_storage::{QueryParam, RawRow, Result};
use serde_json::{json, Value};

pub const FILM_PRODUCER: &str = "film_work_producer";
pub const PERSON_PRODUCER: &str = "person_producer";
pub const PERSON_FILM_ENRICHER: &str = "person_film_work_enricher";
pub const FILM_MERGER: &str = "film_work_merger";
pub const FILM_LOADER: &str = "film_work_loader";
pub const MOVIES_INDEX: &str = "movies";

pub fn producer_sql(marker: &str, table: &str) -> String {
    format!(
        "SELECT id, modified /* {marker} */\nFROM content.{table}\nWHERE modified > :watermark\nORDER BY modified\nLIMIT :limit"
    )
}

pub fn enricher_sql(marker: &str) -> String {
    format!(
        "SELECT DISTINCT pfw.film_work_id AS id /* {marker} */\nFROM content.person_film_work pfw\nWHERE pfw.person_id = ANY(:ids::uuid[])"
    )
}

pub fn film_merger_sql(marker: &str) -> String {
    format!(
        "SELECT fw.id AS fw_uuid, fw.title, fw.description, fw.rating, g.id AS genre_uuid, g.name, \
         pfw.role, p.id AS person_uuid, p.full_name /* {marker} */\n\
         FROM content.film_work fw\n\
         LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id\n\
         LEFT JOIN content.genre g ON g.id = gfw.genre_id\n\
         LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id\n\
         LEFT JOIN content.person p ON p.id = pfw.person_id\n\
         WHERE fw.id = ANY(:ids::uuid[])"
    )
}

/// Film + person producers, person→film enricher, one film merger and loader
pub fn film_pipeline_json(bulk_size: usize, page_size: usize) -> Value {
    json!({
        "database": { "dbname": "movies_database", "user": "app", "host": "localhost" },
        "elastic": { "host": "http://localhost:9200", "bulk_size": bulk_size },
        "producers": [
            {
                "name": FILM_PRODUCER,
                "state_file_path": "state/film_work.json",
                "state_field": "modified",
                "limit": page_size,
                "sql": producer_sql(FILM_PRODUCER, "film_work")
            },
            {
                "name": PERSON_PRODUCER,
                "state_file_path": "state/person.json",
                "state_field": "modified",
                "limit": page_size,
                "sql": producer_sql(PERSON_PRODUCER, "person")
            }
        ],
        "enrichers": [{
            "name": PERSON_FILM_ENRICHER,
            "use": PERSON_PRODUCER,
            "sql": enricher_sql(PERSON_FILM_ENRICHER)
        }],
        "mergers": [{
            "name": FILM_MERGER,
            "use": [FILM_PRODUCER, PERSON_FILM_ENRICHER],
            "sql": film_merger_sql(FILM_MERGER)
        }],
        "loaders": [{
            "name": FILM_LOADER,
            "use": FILM_MERGER,
            "index": MOVIES_INDEX,
            "kind": "film"
        }]
    })
}

pub fn config_from(value: Value) -> EtlConfig {
    let mut config = EtlConfig::from_json_str(&value.to_string()).expect("valid test config");
    config.retry = RetryPolicy::immediate(3);
    config
}

pub fn film_pipeline_config(bulk_size: usize, page_size: usize) -> EtlConfig {
    config_from(film_pipeline_json(bulk_size, page_size))
}

/// Film producer straight into the film merger, no fan-out
pub fn film_only_config(bulk_size: usize, page_size: usize) -> EtlConfig {
    let mut value = film_pipeline_json(bulk_size, page_size);
    value["producers"] = json!([value["producers"][0].clone()]);
    value["enrichers"] = json!([]);
    value["mergers"][0]["use"] = json!([FILM_PRODUCER]);
    config_from(value)
}

/// Two wide rows per film: one genre row and one actor row
pub fn film_rows(id: &str) -> Vec<RawRow> {
    vec![
        RawRow::from_pairs(vec![
            ("fw_uuid", json!(id)),
            ("title", json!(format!("Film {id}"))),
            ("description", json!(null)),
            ("rating", json!(8.1)),
            ("genre_uuid", json!("g-drama")),
            ("name", json!("Drama")),
            ("role", json!(null)),
            ("person_uuid", json!(null)),
            ("full_name", json!(null)),
        ]),
        RawRow::from_pairs(vec![
            ("fw_uuid", json!(id)),
            ("title", json!(format!("Film {id}"))),
            ("description", json!(null)),
            ("rating", json!(8.1)),
            ("genre_uuid", json!(null)),
            ("name", json!(null)),
            ("role", json!("actor")),
            ("person_uuid", json!("p-ann")),
            ("full_name", json!("Ann Actor")),
        ]),
    ]
}

/// Merger handler returning `film_rows` for every bound id
pub fn film_merge_handler() -> impl Fn(&[QueryParam]) -> Result<Vec<RawRow>> + Send + Sync + 'static {
    |params| {
        let ids = params.first().and_then(|p| p.as_text_array()).unwrap_or(&[]);
        Ok(ids.iter().flat_map(|id| film_rows(id)).collect())
    }
}
