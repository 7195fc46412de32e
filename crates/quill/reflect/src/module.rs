//! Loaded modules: one decoded image plus the identity it was loaded under.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quill_lang::{ModuleImage, SourceLocation, SymbolTable};
use serde::{Deserialize, Serialize};

/// Unique identifier of one load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BLAKE3 hash of the module bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One module loaded into a domain.
///
/// Everything but the unloaded flag is fixed at creation. Loading the same
/// bytes again produces a distinct `LoadedModule` with its own id and image.
#[derive(Debug)]
pub struct LoadedModule {
    id: ModuleId,
    image: Arc<ModuleImage>,
    symbols: Option<SymbolTable>,
    bytes: Vec<u8>,
    symbol_bytes: Option<Vec<u8>>,
    hash: ContentHash,
    loaded_at: DateTime<Utc>,
    audited: bool,
    unloaded: Cell<bool>,
}

impl LoadedModule {
    pub fn new(
        image: Arc<ModuleImage>,
        bytes: Vec<u8>,
        symbols: Option<SymbolTable>,
        symbol_bytes: Option<Vec<u8>>,
        audited: bool,
    ) -> Self {
        Self {
            id: ModuleId::generate(),
            hash: ContentHash::of(&bytes),
            image,
            symbols,
            bytes,
            symbol_bytes,
            loaded_at: Utc::now(),
            audited,
            unloaded: Cell::new(false),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Module name as compiled (the artifact name for compiled sources).
    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn image(&self) -> &Arc<ModuleImage> {
        &self.image
    }

    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    /// The bytes the module was loaded from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn symbol_bytes(&self) -> Option<&[u8]> {
        self.symbol_bytes.as_deref()
    }

    pub fn content_hash(&self) -> ContentHash {
        self.hash
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Whether the module went through a security audit before loading.
    pub fn is_audited(&self) -> bool {
        self.audited
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.get()
    }

    pub(crate) fn mark_unloaded(&self) {
        self.unloaded.set(true);
    }

    /// Declaration site of a type (`member == None`) or one of its members.
    pub fn location(&self, type_name: &str, member: Option<&str>) -> Option<SourceLocation> {
        let symbols = self.symbols.as_ref()?;
        match member {
            Some(member) => symbols.member_location(type_name, member),
            None => symbols.type_location(type_name),
        }
        .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_lang::Span;

    fn loaded(bytes: &[u8], symbols: Option<SymbolTable>) -> LoadedModule {
        let image = Arc::new(ModuleImage::empty("QuillModule1"));
        LoadedModule::new(image, bytes.to_vec(), symbols, None, true)
    }

    #[test]
    fn identical_bytes_get_distinct_ids_and_equal_hashes() {
        let a = loaded(b"same", None);
        let b = loaded(b"same", None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), loaded(b"other", None).content_hash());
        assert_eq!(a.content_hash().to_hex(), blake3::hash(b"same").to_hex().as_str());
    }

    #[test]
    fn locations_come_from_symbols() {
        let mut symbols = SymbolTable::new("QuillModule1");
        symbols.insert("Game.Player", SourceLocation::new("p.ql", Span::new(2, 1)));
        symbols.insert(
            SymbolTable::member_key("Game.Player", "heal"),
            SourceLocation::new("p.ql", Span::new(5, 3)),
        );
        let module = loaded(b"x", Some(symbols));
        assert_eq!(module.location("Game.Player", None).map(|l| l.line), Some(2));
        assert_eq!(
            module.location("Game.Player", Some("heal")).map(|l| l.column),
            Some(3)
        );
        assert!(module.location("Game.Player", Some("fly")).is_none());
        assert!(loaded(b"x", None).location("Game.Player", None).is_none());
    }

    #[test]
    fn unload_flag() {
        let module = loaded(b"x", None);
        assert!(!module.is_unloaded());
        module.mark_unloaded();
        assert!(module.is_unloaded());
        assert!(module.is_audited());
        assert_eq!(module.name(), "QuillModule1");
    }
}
