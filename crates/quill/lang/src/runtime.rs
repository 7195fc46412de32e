//! The process-lifetime script runtime.
//!
//! The runtime owns every image ever loaded into it plus the names of the
//! host's own (native) types. It never forgets an image: visibility and
//! unloading are the business of whoever sits on top of it.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ImageError, ImageResult};
use crate::image::{ModuleImage, TypeRef};
use crate::interp::Interpreter;

/// Shared registry of loaded images and native types.
#[derive(Debug, Default)]
pub struct Runtime {
    images: RefCell<Vec<Arc<ModuleImage>>>,
    native_types: RefCell<BTreeSet<String>>,
    interpreter: Interpreter,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(interpreter: Interpreter) -> Self {
        Self {
            interpreter,
            ..Self::default()
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Register a type compiled into the host itself.
    pub fn register_native(&self, full_name: impl Into<String>) {
        self.native_types.borrow_mut().insert(full_name.into());
    }

    pub fn native_types(&self) -> Vec<String> {
        self.native_types.borrow().iter().cloned().collect()
    }

    pub fn is_native(&self, full_name: &str) -> bool {
        self.native_types.borrow().contains(full_name)
    }

    /// Decode, validate and register module bytes.
    ///
    /// Every call yields a fresh image, even for identical bytes.
    pub fn load(&self, bytes: &[u8]) -> ImageResult<Arc<ModuleImage>> {
        let image = ModuleImage::decode(bytes)?;
        validate(&image)?;
        let image = Arc::new(image);
        self.images.borrow_mut().push(Arc::clone(&image));
        debug!(
            module = %image.name,
            types = image.types.len(),
            total = self.image_count(),
            "image loaded into runtime"
        );
        Ok(image)
    }

    /// Number of images loaded over the runtime's lifetime.
    pub fn image_count(&self) -> usize {
        self.images.borrow().len()
    }

    /// Every image loaded so far, in load order.
    pub fn images(&self) -> Vec<Arc<ModuleImage>> {
        self.images.borrow().clone()
    }
}

/// Structural checks the compiler guarantees but foreign bytes may violate.
fn validate(image: &ModuleImage) -> ImageResult<()> {
    let mut names = HashSet::new();
    for ty in &image.types {
        let full_name = ty.full_name();
        if !names.insert(full_name.clone()) {
            return Err(ImageError::Invalid(format!("duplicate type `{full_name}`")));
        }
        let mut members = HashSet::new();
        for method in &ty.methods {
            if !members.insert(method.name.as_str()) {
                return Err(ImageError::Invalid(format!(
                    "duplicate method `{}` in `{full_name}`",
                    method.name
                )));
            }
        }
        for property in &ty.properties {
            if let Some(backing) = &property.backing_field {
                if ty.field(backing).is_none() {
                    return Err(ImageError::Invalid(format!(
                        "property `{}` of `{full_name}` has no backing field `{backing}`",
                        property.name
                    )));
                }
            }
        }
    }
    for (idx, ty) in image.types.iter().enumerate() {
        if let Some(TypeRef::Local(base)) = &ty.base {
            if !names.contains(base) {
                return Err(ImageError::Invalid(format!(
                    "`{}` extends unknown type `{base}`",
                    ty.full_name()
                )));
            }
        }
        let chain = image.base_chain(idx);
        let cyclic = chain.last().is_some_and(|&last| match &image.types[last].base {
            Some(TypeRef::Local(base)) => image
                .type_index(base)
                .is_some_and(|b| chain.contains(&b)),
            _ => false,
        });
        if cyclic {
            return Err(ImageError::Invalid(format!(
                "cyclic inheritance at `{}`",
                ty.full_name()
            )));
        }
    }
    if let Some(entry) = &image.entry {
        if !names.contains(entry) {
            return Err(ImageError::Invalid(format!("entry type `{entry}` is not defined")));
        }
    }
    Ok(())
}
