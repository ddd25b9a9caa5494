//! Parses the JSON:API query-string vocabulary (§4.4 "Query Planner"):
//! `include=a.b,c`, `fields[type]=a,b`, `filter[name]=value`,
//! `sort=a,-b`, `page[number]=N&page[size]=M` or
//! `page[offset]=K&page[limit]=L`.

use indexmap::IndexMap;
use std::collections::HashMap;

/// A single `sort=` term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortTerm {
    pub field: String,
    pub descending: bool,
}

/// Pagination parameters, in whichever style the client used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PageParams {
    #[default]
    None,
    NumberSize {
        number: Option<i64>,
        size: Option<i64>,
    },
    OffsetLimit {
        offset: Option<i64>,
        limit: Option<i64>,
    },
}

/// The raw, type-agnostic result of parsing a query string. Validation
/// against a specific resource's schema (unknown fields, sortable
/// whitelist, include depth) happens in the Validator, not here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Each entry is one dotted `include=` path, already split on `.`.
    pub include: Vec<Vec<String>>,
    /// `fields[type]` → requested field names, in request order.
    pub fields: HashMap<String, Vec<String>>,
    /// `filter[name]` → raw value, in request order.
    pub filters: IndexMap<String, String>,
    pub sort: Vec<SortTerm>,
    pub page: PageParams,
}

/// Split `base[inner]` into `(base, inner)`. Returns `None` for keys with no
/// bracket suffix (e.g. plain `sort`).
fn split_bracket_key(key: &str) -> Option<(&str, &str)> {
    let open = key.find('[')?;
    if !key.ends_with(']') {
        return None;
    }
    Some((&key[..open], &key[open + 1..key.len() - 1]))
}

/// Parse a raw query string (without the leading `?`) into its component
/// parts.
pub fn parse_query_string(raw: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut page_number = None;
    let mut page_size = None;
    let mut page_offset = None;
    let mut page_limit = None;
    let mut saw_number_size = false;
    let mut saw_offset_limit = false;

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match split_bracket_key(&key) {
            Some(("fields", kind)) => {
                let names = value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                parsed.fields.insert(kind.to_string(), names);
            }
            Some(("filter", name)) => {
                parsed.filters.insert(name.to_string(), value.to_string());
            }
            Some(("page", "number")) => {
                page_number = value.parse().ok();
                saw_number_size = true;
            }
            Some(("page", "size")) => {
                page_size = value.parse().ok();
                saw_number_size = true;
            }
            Some(("page", "offset")) => {
                page_offset = value.parse().ok();
                saw_offset_limit = true;
            }
            Some(("page", "limit")) => {
                page_limit = value.parse().ok();
                saw_offset_limit = true;
            }
            _ => match key.as_ref() {
                "include" => {
                    parsed.include = value
                        .split(',')
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(|path| path.split('.').map(|s| s.to_string()).collect())
                        .collect();
                }
                "sort" => {
                    parsed.sort = value
                        .split(',')
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(|term| {
                            if let Some(field) = term.strip_prefix('-') {
                                SortTerm {
                                    field: field.to_string(),
                                    descending: true,
                                }
                            } else {
                                SortTerm {
                                    field: term.to_string(),
                                    descending: false,
                                }
                            }
                        })
                        .collect();
                }
                _ => {}
            },
        }
    }

    parsed.page = if saw_offset_limit {
        PageParams::OffsetLimit {
            offset: page_offset,
            limit: page_limit,
        }
    } else if saw_number_size {
        PageParams::NumberSize {
            number: page_number,
            size: page_size,
        }
    } else {
        PageParams::None
    };

    parsed
}
