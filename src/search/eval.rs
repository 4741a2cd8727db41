//! Evaluation of parsed search expressions against a shelf.
//!
//! Each leaf of the expression tree materializes into a working set: a
//! short-lived temporary SQL table of object ids. `and`/`or`/`not` become
//! intersection, union and complement-within-universe over those tables, so
//! intermediate results never have to be pulled into application memory.
//! Table names come from a private counter, never from the expression;
//! every value is bound as a parameter.

use std::collections::HashSet;

use rusqlite::params_from_iter;

use crate::error::Result;
use crate::search::parser::Expr;
use crate::store::shelf::Shelf;
use crate::store::types::{Album, AlbumKind, ObjectId};

/// Evaluate an expression, returning matching object ids in ascending
/// order.
pub(crate) fn evaluate(shelf: &mut Shelf, expr: &Expr) -> Result<Vec<ObjectId>> {
    let mut evaluator = Evaluator {
        shelf,
        counter: 0,
        tables: Vec::new(),
        visiting_albums: HashSet::new(),
    };
    let result = evaluator.run(expr);
    evaluator.release_tables();
    result
}

/// Handle to one temporary id table.
struct WorkingSet {
    table: String,
}

struct Evaluator<'a> {
    shelf: &'a mut Shelf,
    counter: usize,
    tables: Vec<String>,
    /// Albums currently being expanded, to survive membership cycles and
    /// self-referencing search albums.
    visiting_albums: HashSet<ObjectId>,
}

impl<'a> Evaluator<'a> {
    fn run(&mut self, expr: &Expr) -> Result<Vec<ObjectId>> {
        let set = self.eval(expr)?;
        let conn = self.shelf.connection();
        let mut stmt = conn.prepare(&format!("SELECT id FROM {} ORDER BY id", set.table))?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn new_set(&mut self) -> Result<WorkingSet> {
        let table = format!("search_set_{}", self.counter);
        self.counter += 1;
        self.shelf.connection().execute_batch(&format!(
            "CREATE TEMPORARY TABLE {table} (id INTEGER NOT NULL PRIMARY KEY)"
        ))?;
        self.tables.push(table.clone());
        Ok(WorkingSet { table })
    }

    /// Drop every temporary table this evaluation created. Called once at
    /// the end, also on the error path.
    fn release_tables(&mut self) {
        for table in std::mem::take(&mut self.tables) {
            let _ = self
                .shelf
                .connection()
                .execute_batch(&format!("DROP TABLE IF EXISTS {table}"));
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<WorkingSet> {
        match expr {
            Expr::And(terms) => {
                let mut iter = terms.iter();
                let first = self.eval(iter.next().expect("and of nothing"))?;
                for term in iter {
                    let other = self.eval(term)?;
                    self.shelf.connection().execute(
                        &format!(
                            "DELETE FROM {} WHERE id NOT IN (SELECT id FROM {})",
                            first.table, other.table
                        ),
                        [],
                    )?;
                }
                Ok(first)
            }
            Expr::Or(terms) => {
                let mut iter = terms.iter();
                let first = self.eval(iter.next().expect("or of nothing"))?;
                for term in iter {
                    let other = self.eval(term)?;
                    self.shelf.connection().execute(
                        &format!(
                            "INSERT OR IGNORE INTO {} SELECT id FROM {}",
                            first.table, other.table
                        ),
                        [],
                    )?;
                }
                Ok(first)
            }
            Expr::Not(term) => {
                let sub = self.eval(term)?;
                let complement = self.new_set()?;
                self.shelf.connection().execute(
                    &format!(
                        "INSERT INTO {} SELECT id FROM object \
                         WHERE id NOT IN (SELECT id FROM {})",
                        complement.table, sub.table
                    ),
                    [],
                )?;
                Ok(complement)
            }
            Expr::Category { tag, exactly } => {
                let category = self.shelf.category_by_tag(tag)?;
                let ids = if *exactly {
                    vec![category.id]
                } else {
                    self.shelf.category_descendants(category.id)?
                };
                let set = self.new_set()?;
                let placeholders = placeholders(ids.len());
                self.shelf.connection().execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} SELECT object FROM object_category \
                         WHERE category IN ({placeholders})",
                        set.table
                    ),
                    params_from_iter(ids),
                )?;
                Ok(set)
            }
            Expr::Attribute { name, op, value } => {
                let set = self.new_set()?;
                self.shelf.connection().execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} SELECT object FROM attribute \
                         WHERE name = ?1 AND lcvalue {} ?2",
                        set.table,
                        op.as_sql()
                    ),
                    rusqlite::params![name, value.to_lowercase()],
                )?;
                Ok(set)
            }
            Expr::Album(tag) => {
                let album = self.shelf.album_by_tag(tag)?;
                self.eval_album(&album)
            }
        }
    }

    /// The transitive member closure of an album. Albums reachable through
    /// the membership graph are expanded exactly once per path stack, so
    /// membership cycles terminate.
    fn eval_album(&mut self, album: &Album) -> Result<WorkingSet> {
        let set = self.new_set()?;
        if !self.visiting_albums.insert(album.id) {
            // Already being expanded further up the stack.
            return Ok(set);
        }
        let result = self.fill_album_members(album, &set);
        self.visiting_albums.remove(&album.id);
        result?;
        Ok(set)
    }

    fn fill_album_members(&mut self, album: &Album, set: &WorkingSet) -> Result<()> {
        let members: Vec<ObjectId> = match album.kind {
            AlbumKind::Plain | AlbumKind::Orphans => self.shelf.album_children(album.id)?,
            AlbumKind::Search => {
                let query = match self.shelf.get_attribute(album.id, "query")? {
                    Some(query) if !query.trim().is_empty() => query,
                    _ => return Ok(()),
                };
                // A stored query that no longer parses or resolves
                // contributes nothing.
                let expr = match crate::search::parse(&query) {
                    Ok(expr) => expr,
                    Err(_) => return Ok(()),
                };
                let inner = match self.eval(&expr) {
                    Ok(set) => set,
                    Err(err) if err.is_not_found() => return Ok(()),
                    Err(err) => return Err(err),
                };
                let mut stmt = self
                    .shelf
                    .connection()
                    .prepare(&format!("SELECT id FROM {}", inner.table))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        if members.is_empty() {
            return Ok(());
        }
        {
            let conn = self.shelf.connection();
            let mut stmt =
                conn.prepare(&format!("INSERT OR IGNORE INTO {} (id) VALUES (?1)", set.table))?;
            for member in &members {
                stmt.execute([member])?;
            }
        }
        // Recurse into member albums.
        for member in members {
            let member_album = match self.shelf.album(member) {
                Ok(album) => album,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            let nested = self.eval_album(&member_album)?;
            self.shelf.connection().execute(
                &format!(
                    "INSERT OR IGNORE INTO {} SELECT id FROM {}",
                    set.table, nested.table
                ),
                [],
            )?;
        }
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    let mut s = String::new();
    for i in 1..=n {
        if i > 1 {
            s.push(',');
        }
        s.push('?');
    }
    s
}
