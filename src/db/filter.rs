//! Filter matching and update operators for the embedded store
//!
//! Covers the subset of the MongoDB query language the graph core emits:
//! equality on dotted paths, `$in`, `$ne`, `$exists`, and the update
//! operators `$set`, `$unset`, `$addToSet` (with `$each`) and `$pull`
//! (with `$in`).

use bson::{Bson, Document};

use crate::types::{Result, StoreError};

// =============================================================================
// Paths
// =============================================================================

/// Resolve a dotted path inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn parent_mut<'a>(doc: &'a mut Document, path: &str, create: bool) -> Result<Option<(&'a mut Document, String)>> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = match parts.pop() {
        Some(leaf) if !leaf.is_empty() => leaf.to_string(),
        _ => return Err(StoreError::Validation(format!("Invalid update path: {}", path))),
    };

    let mut current = doc;
    for part in parts {
        if !current.contains_key(part) {
            if !create {
                return Ok(None);
            }
            current.insert(part, Document::new());
        }
        current = match current.get_mut(part) {
            Some(Bson::Document(inner)) => inner,
            Some(_) if !create => return Ok(None),
            _ => {
                return Err(StoreError::Validation(format!(
                    "Cannot traverse non-document field '{}' in path {}",
                    part, path
                )))
            }
        };
    }
    Ok(Some((current, leaf)))
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<()> {
    if let Some((parent, leaf)) = parent_mut(doc, path, true)? {
        parent.insert(leaf, value);
    }
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) -> Result<bool> {
    match parent_mut(doc, path, false)? {
        Some((parent, leaf)) => Ok(parent.remove(&leaf).is_some()),
        None => Ok(false),
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Check whether `doc` satisfies `filter`
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(path, expected)| {
        let actual = get_path(doc, path);
        match expected {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, arg)| match_operator(actual, op, arg))
            }
            _ => actual == Some(expected),
        }
    })
}

fn match_operator(actual: Option<&Bson>, op: &str, arg: &Bson) -> bool {
    match op {
        "$in" => match arg {
            Bson::Array(values) => actual.is_some_and(|a| values.contains(a)),
            _ => false,
        },
        "$ne" => actual != Some(arg),
        "$exists" => {
            let wanted = !matches!(arg, Bson::Boolean(false) | Bson::Null);
            actual.is_some() == wanted
        }
        _ => false,
    }
}

// =============================================================================
// Updates
// =============================================================================

/// Apply an update document in place, returning whether anything changed
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool> {
    let before = doc.clone();

    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ => {
                return Err(StoreError::Validation(format!(
                    "Update operator {} expects a document",
                    op
                )))
            }
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(doc, path)?;
                }
            }
            "$addToSet" => {
                for (path, value) in fields {
                    let items = each_items(value);
                    let array = array_at(doc, path)?;
                    for item in items {
                        if !array.contains(&item) {
                            array.push(item);
                        }
                    }
                }
            }
            "$pull" => {
                for (path, value) in fields {
                    let items = in_items(value);
                    if get_path(doc, path).is_none() {
                        continue;
                    }
                    let array = array_at(doc, path)?;
                    array.retain(|item| !items.contains(item));
                }
            }
            other => {
                return Err(StoreError::Validation(format!(
                    "Unsupported update operator: {}",
                    other
                )))
            }
        }
    }

    Ok(*doc != before)
}

fn each_items(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(d) => match d.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    }
}

fn in_items(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(d) => match d.get("$in") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    }
}

fn array_at<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Vec<Bson>> {
    let Some((parent, leaf)) = parent_mut(doc, path, true)? else {
        return Err(StoreError::Validation(format!("Invalid array path: {}", path)));
    };
    if !parent.contains_key(&leaf) {
        parent.insert(leaf.clone(), Bson::Array(Vec::new()));
    }
    match parent.get_mut(&leaf) {
        Some(Bson::Array(array)) => Ok(array),
        _ => Err(StoreError::Validation(format!(
            "Field '{}' is not an array",
            path
        ))),
    }
}
