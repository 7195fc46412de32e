#[path = "property/artifact_names.rs"]
mod artifact_names;

#[path = "property/restrictions.rs"]
mod restrictions;

#[path = "property/member_cache.rs"]
mod member_cache;
