//! Row → document folding
//!
//! Merger queries return one wide row per (root, sub-entity) pair. Each
//! transformer groups rows by root id explicitly (input order is never
//! assumed), takes root scalars from the first row of the group and
//! collects sub-entities once per id, keeping the first-seen value and
//! first-seen order. Output is ordered by root id.

use filmsync_storage::{EntityId, RawRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::Result;

/// Which transformer a loader applies to its merger's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Film,
    Genre,
    Person,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Film => "film",
            RecordKind::Genre => "genre",
            RecordKind::Person => "person",
        }
    }

    /// Row column holding the root id
    pub fn root_field(&self) -> &'static str {
        match self {
            RecordKind::Film => "fw_uuid",
            RecordKind::Genre | RecordKind::Person => "uuid",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreRef {
    pub uuid: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRef {
    pub uuid: EntityId,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmRecord {
    pub uuid: EntityId,
    pub title: String,
    pub imdb_rating: Option<f64>,
    pub description: Option<String>,
    pub genres_names: Vec<String>,
    pub genre: Vec<GenreRef>,
    pub directors_names: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    pub directors: Vec<PersonRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreRecord {
    pub uuid: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub uuid: EntityId,
    pub full_name: String,
    /// Comma-separated roles, present when the query supplies a `role` column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Films the person took part in, present when the query supplies `film_uuid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub film_ids: Option<Vec<EntityId>>,
}

/// One assembled document, ready for the index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainRecord {
    Film(FilmRecord),
    Genre(GenreRecord),
    Person(PersonRecord),
}

impl DomainRecord {
    pub fn id(&self) -> &str {
        match self {
            DomainRecord::Film(r) => &r.uuid,
            DomainRecord::Genre(r) => &r.uuid,
            DomainRecord::Person(r) => &r.uuid,
        }
    }

    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Insertion-ordered set of sub-entities keyed by id, first value wins
struct FirstSeen<T> {
    seen: HashSet<EntityId>,
    items: Vec<T>,
}

impl<T> FirstSeen<T> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    fn insert(&mut self, id: &str, make: impl FnOnce() -> T) {
        if self.seen.insert(id.to_string()) {
            self.items.push(make());
        }
    }

    fn into_vec(self) -> Vec<T> {
        self.items
    }
}

fn names(people: &[PersonRef]) -> Vec<String> {
    people.iter().map(|p| p.full_name.clone()).collect()
}

/// Join key of a sub-entity; blank text never identifies anything
fn key<'a>(row: &'a RawRow, field: &str) -> Option<&'a str> {
    row.opt_str(field).filter(|s| !s.is_empty())
}

fn group_by_root<'a>(rows: &'a [RawRow], field: &str) -> Result<BTreeMap<EntityId, Vec<&'a RawRow>>> {
    let mut groups: BTreeMap<EntityId, Vec<&RawRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.id_field(field)?).or_default().push(row);
    }
    Ok(groups)
}

/// Fold rows of `kind` into documents
pub fn transform(kind: RecordKind, rows: &[RawRow]) -> Result<Vec<DomainRecord>> {
    let records: Vec<DomainRecord> = match kind {
        RecordKind::Film => transform_films(rows)?
            .into_iter()
            .map(DomainRecord::Film)
            .collect(),
        RecordKind::Genre => transform_genres(rows)?
            .into_iter()
            .map(DomainRecord::Genre)
            .collect(),
        RecordKind::Person => transform_persons(rows)?
            .into_iter()
            .map(DomainRecord::Person)
            .collect(),
    };
    debug!("Transformed {} rows into {} {} records", rows.len(), records.len(), kind);
    Ok(records)
}

pub fn transform_films(rows: &[RawRow]) -> Result<Vec<FilmRecord>> {
    let mut out = Vec::new();

    for (uuid, group) in group_by_root(rows, RecordKind::Film.root_field())? {
        let head = group[0];

        let mut genres = FirstSeen::new();
        let mut directors = FirstSeen::new();
        let mut actors = FirstSeen::new();
        let mut writers = FirstSeen::new();

        for row in &group {
            if let Some(genre_id) = key(row, "genre_uuid") {
                genres.insert(genre_id, || GenreRef {
                    uuid: genre_id.to_string(),
                    name: row.opt_str("name").unwrap_or_default().to_string(),
                });
            }

            let (Some(role), Some(person_id)) = (key(row, "role"), key(row, "person_uuid"))
            else {
                continue;
            };
            let bucket = match role {
                "director" => &mut directors,
                "actor" => &mut actors,
                "writer" => &mut writers,
                other => {
                    debug!("Film {}: ignoring person role '{}'", uuid, other);
                    continue;
                }
            };
            bucket.insert(person_id, || PersonRef {
                uuid: person_id.to_string(),
                full_name: row.opt_str("full_name").unwrap_or_default().to_string(),
            });
        }

        let genre = genres.into_vec();
        let directors = directors.into_vec();
        let actors = actors.into_vec();
        let writers = writers.into_vec();

        out.push(FilmRecord {
            title: head.str_field("title")?.to_string(),
            imdb_rating: head.opt_f64("rating"),
            description: head.opt_str("description").map(str::to_string),
            genres_names: genre.iter().map(|g| g.name.clone()).collect(),
            directors_names: names(&directors),
            actors_names: names(&actors),
            writers_names: names(&writers),
            genre,
            directors,
            actors,
            writers,
            uuid,
        });
    }

    Ok(out)
}

pub fn transform_genres(rows: &[RawRow]) -> Result<Vec<GenreRecord>> {
    group_by_root(rows, RecordKind::Genre.root_field())?
        .into_iter()
        .map(|(uuid, group)| {
            Ok(GenreRecord {
                name: group[0].str_field("name")?.to_string(),
                uuid,
            })
        })
        .collect()
}

pub fn transform_persons(rows: &[RawRow]) -> Result<Vec<PersonRecord>> {
    let mut out = Vec::new();

    for (uuid, group) in group_by_root(rows, RecordKind::Person.root_field())? {
        let mut roles = FirstSeen::new();
        let mut films = FirstSeen::new();
        let mut has_role_column = false;
        let mut has_film_column = false;

        for row in &group {
            has_role_column |= row.get("role").is_some();
            has_film_column |= row.get("film_uuid").is_some();
            if let Some(role) = key(row, "role") {
                roles.insert(role, || role.to_string());
            }
            if let Some(film) = key(row, "film_uuid") {
                films.insert(film, || film.to_string());
            }
        }

        let roles = roles.into_vec();
        out.push(PersonRecord {
            full_name: group[0].str_field("full_name")?.to_string(),
            role: (has_role_column && !roles.is_empty()).then(|| roles.join(", ")),
            film_ids: has_film_column.then(|| films.into_vec()),
            uuid,
        });
    }

    Ok(out)
}
