//! Predicate evaluation.
//!
//! A search context compiles to one SQL statement over the files current in
//! the searched file services. Each predicate contributes a clause and its
//! parameters; every clause is a filter, so their conjunction is the
//! intersection the caller asked for. SIMILAR_TO is resolved in Rust
//! against the stored perceptual hashes and intersected afterwards.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::services::{file_scope, local_file_service_id, require_service, tag_scope};
use super::similarity::similar_hash_ids;
use super::{now, Database};
use crate::error::{Error, Result};
use crate::media::{FileId, Hash};
use crate::predicates::{
    FileServiceStatus, Operator, Predicate, RatingOperator, SearchContext, AGE_TOLERANCE, COUNT_TOLERANCE,
    DIMENSION_TOLERANCE, DURATION_TOLERANCE, RATIO_TOLERANCE, SIZE_TOLERANCE,
};
use crate::services::ServiceKey;

use super::schema::{STATUS_CURRENT, STATUS_PENDING};

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn int_values(ids: &[i64]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Integer(*id))
}

#[derive(Default)]
struct Clauses {
    sql: Vec<String>,
    params: Vec<Value>,
}

impl Clauses {
    fn push(&mut self, clause: String, params: Vec<Value>) {
        self.sql.push(clause);
        self.params.extend(params);
    }

    /// `expr <op> value`, with `≈` as an inclusive band of `tolerance`.
    fn compare(
        &mut self,
        expr: &str,
        expr_params: Vec<Value>,
        operator: Operator,
        value: f64,
        tolerance: f64,
    ) {
        let (clause, operands) = match operator {
            Operator::Less => (format!("{} < ?", expr), vec![Value::Real(value)]),
            Operator::Equal => (format!("{} = ?", expr), vec![Value::Real(value)]),
            Operator::Greater => (format!("{} > ?", expr), vec![Value::Real(value)]),
            Operator::Approx => {
                let (low, high) = Operator::approx_band(value, tolerance);
                (
                    format!("{} BETWEEN ? AND ?", expr),
                    vec![Value::Real(low), Value::Real(high)],
                )
            }
        };
        self.push(clause, expr_params.into_iter().chain(operands).collect());
    }
}

/// Everything a compiled query needs besides the predicates themselves.
struct Scope {
    file_services: Vec<i64>,
    tag_services: Vec<i64>,
    tag_statuses: Vec<i64>,
    local: i64,
    now: i64,
}

fn compile(conn: &Connection, scope: &Scope, predicate: &Predicate, clauses: &mut Clauses) -> Result<()> {
    match predicate {
        Predicate::Everything | Predicate::Limit(_) | Predicate::SimilarTo { .. } => {}
        Predicate::Inbox => {
            clauses.push("f.hash_id IN (SELECT hash_id FROM file_inbox)".into(), vec![]);
        }
        Predicate::Archive => {
            clauses.push("f.hash_id NOT IN (SELECT hash_id FROM file_inbox)".into(), vec![]);
        }
        Predicate::Local => clauses.push(
            "f.hash_id IN (SELECT hash_id FROM current_files WHERE service_id = ?)".into(),
            vec![Value::Integer(scope.local)],
        ),
        Predicate::NotLocal => clauses.push(
            "f.hash_id NOT IN (SELECT hash_id FROM current_files WHERE service_id = ?)".into(),
            vec![Value::Integer(scope.local)],
        ),
        Predicate::Age { operator, span } => {
            // Younger than the span means a timestamp after now - span.
            let span = span.seconds() as f64;
            let cutoff = scope.now as f64 - span;
            match operator {
                Operator::Less => clauses.push("s.timestamp > ?".into(), vec![Value::Real(cutoff)]),
                // A file imported this second is older than a zero span.
                Operator::Greater => clauses.push("s.timestamp <= ?".into(), vec![Value::Real(cutoff)]),
                Operator::Equal => clauses.push("s.timestamp = ?".into(), vec![Value::Real(cutoff)]),
                Operator::Approx => {
                    let (low, high) = Operator::approx_band(span, AGE_TOLERANCE);
                    clauses.push(
                        "s.timestamp > ? AND s.timestamp < ?".into(),
                        vec![
                            Value::Real(scope.now as f64 - high),
                            Value::Real(scope.now as f64 - low),
                        ],
                    );
                }
            }
        }
        Predicate::Duration { operator, millis } => clauses.compare(
            "COALESCE(f.duration, 0)",
            vec![],
            *operator,
            *millis as f64,
            DURATION_TOLERANCE,
        ),
        Predicate::Width { operator, pixels } => {
            clauses.compare("f.width", vec![], *operator, *pixels as f64, DIMENSION_TOLERANCE)
        }
        Predicate::Height { operator, pixels } => {
            clauses.compare("f.height", vec![], *operator, *pixels as f64, DIMENSION_TOLERANCE)
        }
        Predicate::NumWords { operator, count } => clauses.compare(
            "COALESCE(f.num_words, 0)",
            vec![],
            *operator,
            *count as f64,
            COUNT_TOLERANCE,
        ),
        Predicate::Size { operator, value, unit } => {
            let bytes = value.saturating_mul(unit.multiplier());
            clauses.compare("f.size", vec![], *operator, bytes as f64, SIZE_TOLERANCE)
        }
        Predicate::NumTags { operator, count } => {
            if scope.tag_services.is_empty() || scope.tag_statuses.is_empty() {
                clauses.compare("0", vec![], *operator, *count as f64, COUNT_TOLERANCE);
            } else {
                let expr = format!(
                    "(SELECT COUNT(DISTINCT m.tag_id) FROM mappings m \
                     WHERE m.hash_id = f.hash_id AND m.service_id IN ({}) AND m.status IN ({}))",
                    placeholders(scope.tag_services.len()),
                    placeholders(scope.tag_statuses.len()),
                );
                let params = int_values(&scope.tag_services)
                    .chain(int_values(&scope.tag_statuses))
                    .collect();
                clauses.compare(&expr, params, *operator, *count as f64, COUNT_TOLERANCE);
            }
        }
        Predicate::Ratio { operator, ratio } => {
            let (w, h) = (ratio.width() as i64, ratio.height() as i64);
            match operator {
                Operator::Less => clauses.push(
                    "f.width * ? < f.height * ?".into(),
                    vec![Value::Integer(h), Value::Integer(w)],
                ),
                Operator::Equal => clauses.push(
                    "f.width * ? = f.height * ?".into(),
                    vec![Value::Integer(h), Value::Integer(w)],
                ),
                Operator::Greater => clauses.push(
                    "f.width * ? > f.height * ?".into(),
                    vec![Value::Integer(h), Value::Integer(w)],
                ),
                Operator::Approx => {
                    let (low, high) = Operator::approx_band(ratio.value(), RATIO_TOLERANCE);
                    clauses.push(
                        "f.height > 0 AND CAST(f.width AS REAL) / f.height BETWEEN ? AND ?".into(),
                        vec![Value::Real(low), Value::Real(high)],
                    );
                }
            }
        }
        Predicate::Hash(hash) => clauses.push(
            "f.hash_id IN (SELECT hash_id FROM hashes WHERE hash = ?)".into(),
            vec![Value::Blob(hash.as_bytes().to_vec())],
        ),
        Predicate::Mime(mimes) => {
            let codes: Vec<Value> = mimes.iter().map(|m| Value::Integer(m.code())).collect();
            clauses.push(format!("f.mime IN ({})", placeholders(codes.len())), codes);
        }
        Predicate::FileService { present, status, service } => {
            let services = file_scope(conn, service)?;
            let table = match status {
                FileServiceStatus::Current => "current_files",
                FileServiceStatus::Pending => "pending_files",
            };
            let negation = if *present { "" } else { "NOT " };
            if services.is_empty() {
                if *present {
                    clauses.push("0".into(), vec![]);
                }
            } else {
                clauses.push(
                    format!(
                        "f.hash_id {}IN (SELECT hash_id FROM {} WHERE service_id IN ({}))",
                        negation,
                        table,
                        placeholders(services.len())
                    ),
                    int_values(&services).collect(),
                );
            }
        }
        Predicate::Tag { tag, inclusive } => {
            let negation = if *inclusive { "" } else { "NOT " };
            if scope.tag_services.is_empty() || scope.tag_statuses.is_empty() {
                if *inclusive {
                    clauses.push("0".into(), vec![]);
                }
            } else {
                let clause = format!(
                    "f.hash_id {}IN (SELECT m.hash_id FROM mappings m JOIN tags t ON t.tag_id = m.tag_id \
                     WHERE t.tag = ? AND m.service_id IN ({}) AND m.status IN ({}))",
                    negation,
                    placeholders(scope.tag_services.len()),
                    placeholders(scope.tag_statuses.len()),
                );
                let params: Vec<Value> = std::iter::once(Value::Text(tag.clone()))
                    .chain(int_values(&scope.tag_services))
                    .chain(int_values(&scope.tag_statuses))
                    .collect();
                clauses.push(clause, params);
            }
        }
        Predicate::Rating { service, operator, value } => {
            let row = require_service(conn, service)?;
            if !row.service.service_type().is_rating_service() {
                return Err(Error::InvalidPredicate(format!("{} is not a rating service", service)));
            }
            let stored = row
                .service
                .config
                .encode_rating(value)
                .map_err(|e| Error::InvalidPredicate(e.to_string()))?;
            let symbol = match operator {
                RatingOperator::Less => "<",
                RatingOperator::Equal => "=",
                RatingOperator::Greater => ">",
            };
            clauses.push(
                format!(
                    "f.hash_id IN (SELECT hash_id FROM ratings WHERE service_id = ? AND rating {} ?)",
                    symbol
                ),
                vec![Value::Integer(row.id), Value::Real(stored)],
            );
        }
    }
    Ok(())
}

impl Database {
    /// Ids of every file in the context's file service matching all of its
    /// predicates. LIMIT predicates are not applied here; see
    /// [`SearchContext::apply_limit`].
    pub fn file_query_ids(&self, context: &SearchContext) -> Result<HashSet<FileId>> {
        let conn = &self.conn;
        let mut statuses = Vec::new();
        if context.include_current_tags() {
            statuses.push(STATUS_CURRENT);
        }
        if context.include_pending_tags() {
            statuses.push(STATUS_PENDING);
        }
        let scope = Scope {
            file_services: file_scope(conn, context.file_service())?,
            tag_services: tag_scope(conn, context.tag_service())?,
            tag_statuses: statuses,
            local: local_file_service_id(conn)?,
            now: now(),
        };
        if scope.file_services.is_empty() {
            return Ok(HashSet::new());
        }

        let mut clauses = Clauses::default();
        for predicate in context.predicates() {
            compile(conn, &scope, predicate, &mut clauses)?;
        }

        let mut sql = format!(
            "SELECT f.hash_id FROM files_info f \
             JOIN (SELECT hash_id, MIN(timestamp) AS timestamp FROM current_files \
                   WHERE service_id IN ({}) GROUP BY hash_id) s ON s.hash_id = f.hash_id",
            placeholders(scope.file_services.len())
        );
        if !clauses.sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.sql.join(" AND "));
        }
        let params: Vec<Value> = int_values(&scope.file_services).chain(clauses.params).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut ids: HashSet<i64> = stmt
            .query_map(params_from_iter(params), |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        for predicate in context.predicates() {
            if let Predicate::SimilarTo { hash, max_distance } = predicate {
                let similar: HashSet<i64> =
                    similar_hash_ids(conn, hash, *max_distance)?.into_iter().collect();
                ids.retain(|id| similar.contains(id));
            }
        }

        debug!(
            file_service = %context.file_service(),
            predicates = context.predicates().len(),
            results = ids.len(),
            "Evaluated file query"
        );
        Ok(ids.into_iter().map(FileId).collect())
    }

    /// File ids for a set of hashes, skipping unknown ones.
    pub fn file_ids(&self, hashes: &[Hash]) -> Result<Vec<FileId>> {
        let mut ids = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(id) = super::files::hash_id(&self.conn, hash)? {
                ids.push(FileId(id));
            }
        }
        Ok(ids)
    }

    /// Whether `key` names a file service a query can run over.
    pub fn is_searchable(&self, key: &ServiceKey) -> Result<bool> {
        match file_scope(&self.conn, key) {
            Ok(_) => Ok(true),
            Err(Error::InvalidPredicate(_)) | Err(Error::UnknownService(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentUpdate;
    use crate::db::FileInfo;
    use crate::media::{Hash, Mime};
    use crate::predicates::{AgeSpan, Ratio};
    use crate::storage::StorageLayout;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn seeded() -> (tempfile::TempDir, Database, Hash) {
        let dir = tempdir().unwrap();
        let mut db = Database::open(StorageLayout::new(dir.path())).unwrap();
        let hash = Hash([3; 32]);
        let mut info = FileInfo::new(5270, Mime::ImagePng);
        info.width = Some(200);
        info.height = Some(200);
        db.record_local_import(&hash, &info, &[0; 16], Some(&[0xf0, 0x0f])).unwrap();
        (dir, db, hash)
    }

    fn count(db: &Database, predicates: Vec<Predicate>) -> usize {
        let context = SearchContext::new(ServiceKey::local_file(), predicates).unwrap();
        db.file_query_ids(&context).unwrap().len()
    }

    #[test]
    fn test_everything_and_empty_context() {
        let (_dir, db, _) = seeded();
        assert_eq!(count(&db, vec![]), 1);
        assert_eq!(count(&db, vec![Predicate::Everything]), 1);
    }

    #[test]
    fn test_numeric_predicates() {
        let (_dir, db, _) = seeded();
        let width = |operator, pixels| Predicate::Width { operator, pixels };
        assert_eq!(count(&db, vec![width(Operator::Less, 201)]), 1);
        assert_eq!(count(&db, vec![width(Operator::Less, 200)]), 0);
        assert_eq!(count(&db, vec![width(Operator::Approx, 200)]), 1);
        assert_eq!(count(&db, vec![width(Operator::Approx, 60)]), 0);
        assert_eq!(count(&db, vec![width(Operator::Greater, 199)]), 1);

        let duration = |operator, millis| Predicate::Duration { operator, millis };
        assert_eq!(count(&db, vec![duration(Operator::Equal, 0)]), 1);
        assert_eq!(count(&db, vec![duration(Operator::Greater, 0)]), 0);
    }

    #[test]
    fn test_age_brackets_import_time() {
        let (_dir, db, _) = seeded();
        let age = |operator, span| Predicate::Age { operator, span };
        assert_eq!(count(&db, vec![age(Operator::Less, AgeSpan::new(0, 0, 1, 0))]), 1);
        assert_eq!(count(&db, vec![age(Operator::Greater, AgeSpan::new(0, 0, 1, 0))]), 0);
        assert_eq!(count(&db, vec![age(Operator::Approx, AgeSpan::new(1, 1, 1, 1))]), 0);
    }

    #[test]
    fn test_zero_age_span() {
        let (_dir, db, _) = seeded();
        let age = |operator| Predicate::Age { operator, span: AgeSpan::default() };
        assert_eq!(count(&db, vec![age(Operator::Less)]), 0);
        assert_eq!(count(&db, vec![age(Operator::Approx)]), 0);
        assert_eq!(count(&db, vec![age(Operator::Greater)]), 1);
    }

    #[test]
    fn test_ratio_and_similarity() {
        let (_dir, db, hash) = seeded();
        let ratio = |operator, w, h| Predicate::Ratio { operator, ratio: Ratio::new(w, h).unwrap() };
        assert_eq!(count(&db, vec![ratio(Operator::Equal, 1, 1)]), 1);
        assert_eq!(count(&db, vec![ratio(Operator::Equal, 4, 3)]), 0);
        assert_eq!(count(&db, vec![ratio(Operator::Approx, 200, 201)]), 1);
        assert_eq!(count(&db, vec![ratio(Operator::Less, 4, 3)]), 1);

        assert_eq!(count(&db, vec![Predicate::similar_to(hash, 0).unwrap()]), 1);
        assert_eq!(count(&db, vec![Predicate::similar_to(Hash([9; 32]), 256).unwrap()]), 0);
    }

    #[test]
    fn test_tags_respect_statuses() {
        let (_dir, mut db, hash) = seeded();
        let updates = BTreeMap::from([(
            ServiceKey::local_tag(),
            vec![ContentUpdate::add_mapping("car", vec![hash]).unwrap()],
        )]);
        db.apply_content_updates(&updates).unwrap();

        assert_eq!(count(&db, vec![Predicate::tag("car", true).unwrap()]), 1);
        assert_eq!(count(&db, vec![Predicate::tag("car", false).unwrap()]), 0);
        assert_eq!(count(&db, vec![Predicate::NumTags { operator: Operator::Equal, count: 1 }]), 1);

        let pending_only = SearchContext::new(
            ServiceKey::local_file(),
            vec![Predicate::tag("car", true).unwrap()],
        )
        .unwrap()
        .with_tag_statuses(false, true);
        assert!(db.file_query_ids(&pending_only).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_file_service() {
        let (_dir, db, _) = seeded();
        let context = SearchContext::new(ServiceKey::generate(), vec![]).unwrap();
        assert!(matches!(db.file_query_ids(&context), Err(Error::UnknownService(_))));
        assert!(!db.is_searchable(&ServiceKey::local_tag()).unwrap());
        assert!(db.is_searchable(&ServiceKey::combined_file()).unwrap());
    }
}
