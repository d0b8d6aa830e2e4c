//! Client-side filtering: filter declarations, filter state, derived views and
//! chained (parent/child) dropdown domains.

use std::collections::{BTreeMap, HashSet};

use crate::{error::SyncError, resource::Resource};

/// How a declared filter decides whether a record passes.
pub enum Predicate<R: Resource> {
    /// Case-insensitive substring match against any of the returned fields.
    Text(fn(&R) -> Vec<String>),
    /// Exact match of the field against the selected value. Records without the
    /// field never match an active filter.
    Equals(fn(&R) -> Option<String>),
    /// Match that needs the auxiliary collections or other filter values.
    Related(fn(&R, &str, &FilterState, &R::Auxiliary) -> bool),
    /// Sent to the backend as a query parameter of the list request.
    Server,
}

pub struct FilterDef<R: Resource> {
    pub name: &'static str,
    pub predicate: Predicate<R>,
    /// Filter whose change resets this one.
    pub parent: Option<&'static str>,
}

impl<R: Resource> FilterDef<R> {
    pub fn text(name: &'static str, fields: fn(&R) -> Vec<String>) -> Self {
        Self {
            name,
            predicate: Predicate::Text(fields),
            parent: None,
        }
    }

    pub fn equals(name: &'static str, field: fn(&R) -> Option<String>) -> Self {
        Self {
            name,
            predicate: Predicate::Equals(field),
            parent: None,
        }
    }

    pub fn related(
        name: &'static str,
        matches: fn(&R, &str, &FilterState, &R::Auxiliary) -> bool,
    ) -> Self {
        Self {
            name,
            predicate: Predicate::Related(matches),
            parent: None,
        }
    }

    pub fn server(name: &'static str) -> Self {
        Self {
            name,
            predicate: Predicate::Server,
            parent: None,
        }
    }

    pub fn child_of(mut self, parent: &'static str) -> Self {
        self.parent = Some(parent);
        self
    }

    fn is_text(&self) -> bool {
        matches!(self.predicate, Predicate::Text(_))
    }

    fn accepts(&self, record: &R, value: &str, state: &FilterState, aux: &R::Auxiliary) -> bool {
        match &self.predicate {
            Predicate::Text(fields) => {
                let needle = value.to_lowercase();
                fields(record)
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            Predicate::Equals(field) => field(record).is_some_and(|v| v == value),
            Predicate::Related(matches) => matches(record, value, state, aux),
            Predicate::Server => true,
        }
    }
}

/// Current filter values by name. The empty string is the unset value and is
/// stored as absence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    values: BTreeMap<String, String>,
}

impl FilterState {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value of `name`, or `""` when unset.
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn assign(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value.to_string());
        }
    }
}

/// Selectable values of one filter, as `(value, label)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDomain {
    pub filter: &'static str,
    pub options: Vec<(String, String)>,
}

impl FilterDomain {
    pub fn new(filter: &'static str, options: Vec<(String, String)>) -> Self {
        Self { filter, options }
    }

    /// Domain whose labels are the values themselves.
    pub fn values(filter: &'static str, values: Vec<String>) -> Self {
        Self {
            filter,
            options: values.into_iter().map(|v| (v.clone(), v)).collect(),
        }
    }
}

/// What a filter change requires from the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEffect {
    /// Only the derived view changes.
    Local,
    /// A server-side filter changed; the collection has to be loaded again.
    Reload,
}

/// Sets `name` to `value` and resets every filter that depends on it, transitively.
/// A parent always resets its children, even when set to its current value.
pub fn apply_filter<R: Resource>(
    defs: &[FilterDef<R>],
    state: &mut FilterState,
    name: &str,
    value: &str,
) -> Result<FilterEffect, SyncError> {
    let def = defs
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| SyncError::UnknownFilter {
            resource: R::NAME,
            name: name.to_string(),
        })?;

    state.assign(name, value);

    let mut effect = if matches!(def.predicate, Predicate::Server) {
        FilterEffect::Reload
    } else {
        FilterEffect::Local
    };

    let mut pending = vec![def.name];
    while let Some(parent) = pending.pop() {
        for child in defs.iter().filter(|d| d.parent == Some(parent)) {
            state.assign(child.name, "");
            if matches!(child.predicate, Predicate::Server) {
                effect = FilterEffect::Reload;
            }
            pending.push(child.name);
        }
    }

    Ok(effect)
}

/// Query parameters for every active server-side filter.
pub fn server_query<R: Resource>(defs: &[FilterDef<R>], state: &FilterState) -> Vec<(String, String)> {
    defs.iter()
        .filter(|d| matches!(d.predicate, Predicate::Server))
        .filter_map(|d| state.get(d.name).map(|v| (d.name.to_string(), v.to_string())))
        .collect()
}

/// Records of `collection` passing every active filter, in collection order.
/// Text filters are evaluated first, then the others in declaration order.
pub fn derive_view<'a, R: Resource>(
    defs: &[FilterDef<R>],
    collection: &'a [R],
    state: &FilterState,
    aux: &R::Auxiliary,
) -> Vec<&'a R> {
    let active: Vec<(&FilterDef<R>, &str)> = defs
        .iter()
        .filter(|d| d.is_text())
        .chain(defs.iter().filter(|d| !d.is_text()))
        .filter_map(|d| state.get(d.name).map(|v| (d, v)))
        .collect();

    collection
        .iter()
        .filter(|record| {
            active
                .iter()
                .all(|(def, value)| def.accepts(record, value, state, aux))
        })
        .collect()
}

/// Candidates whose parent reference equals the selected parent key. No parent
/// selected yields an empty domain.
pub fn child_domain<'a, C, F>(candidates: &'a [C], parent_ref: F, selected: Option<&str>) -> Vec<&'a C>
where
    F: Fn(&C) -> String,
{
    let Some(selected) = selected.filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    candidates
        .iter()
        .filter(|c| parent_ref(c) == selected)
        .collect()
}

/// Unique non-empty values of a field in first-seen order, for dropdown domains.
pub fn distinct_values<R, F>(collection: &[R], field: F) -> Vec<String>
where
    F: Fn(&R) -> Option<String>,
{
    let mut seen = HashSet::new();
    collection
        .iter()
        .filter_map(field)
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;
