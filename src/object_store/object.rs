use std::{fs, path::PathBuf};

use crate::{
    attribute::{AttributeValue, Blob},
    error::{Attributes, Error, Result},
    kind::{AttributeSpec, Kind, ReferenceMode},
    reference::Reference,
};

use super::{digest, staging::StagingSession, Store};

/// A handle on one object, either published (read-only, attributes read on
/// demand from its canonical directory) or in staging.
#[derive(Debug)]
pub struct Object {
    store: Store,
    kind: Kind,
    id: Option<String>,
    staging: Option<StagingSession>,
}

impl Object {
    pub(super) fn new(store: Store, kind: Kind, id: Option<String>) -> Self {
        Object {
            store,
            kind,
            id,
            staging: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The object's reference, once it has an id.
    pub fn reference(&self) -> Option<Reference> {
        let id = self.id.as_ref()?;
        Reference::new(self.kind, id.clone()).ok()
    }

    /// Whether a published form exists under the object's id.
    pub fn exists(&self) -> Result<bool> {
        match self.reference() {
            Some(reference) => self.store.has(&reference),
            None => Ok(false),
        }
    }

    pub fn is_staged(&self) -> bool {
        self.staging.is_some()
    }

    pub fn staging_dir(&self) -> Option<PathBuf> {
        self.staging.as_ref().map(|session| session.dir().to_path_buf())
    }

    fn dir(&self) -> Option<PathBuf> {
        match (&self.staging, self.reference()) {
            (Some(session), _) => Some(session.dir().to_path_buf()),
            (None, Some(reference)) => Some(self.store.object_dir(&reference)),
            (None, None) => None,
        }
    }

    fn spec(&self, attribute: &str) -> Result<&'static AttributeSpec> {
        self.kind
            .schema()
            .attribute(attribute)
            .ok_or_else(|| Error::UnexpectedAttribute {
                kind: self.kind,
                unexpected: Attributes(vec![attribute.to_string()]),
            })
    }

    /// Enters staging if not already there, seeding the scratch directory
    /// from the published form. Fails with [`Error::ObjectBusy`] when another
    /// session is staging the same target.
    pub fn stage(&mut self) -> Result<()> {
        if self.staging.is_some() {
            return Ok(());
        }
        let (named, published, target) = match self.reference() {
            Some(reference) => {
                let named = match self.kind.schema().mode {
                    ReferenceMode::Named => Some(reference.id().to_string()),
                    ReferenceMode::ContentDerived => None,
                };
                (
                    named,
                    Some(self.store.object_dir(&reference)),
                    reference.to_string(),
                )
            }
            None => (None, None, format!("new {}", self.kind)),
        };
        let session = StagingSession::begin(
            &self.store.stage_dir(self.kind),
            &target,
            named.as_deref(),
            published.as_deref(),
        )?;
        self.staging = Some(session);
        Ok(())
    }

    /// Reads and decodes one attribute, or `None` if it was never set.
    pub fn get(&self, attribute: &str) -> Result<Option<AttributeValue>> {
        let spec = self.spec(attribute)?;
        let Some(dir) = self.dir() else {
            return Ok(None);
        };
        let path = dir.join(spec.ty.file_name(attribute));
        if !path.try_exists()? {
            return Ok(None);
        }
        Ok(Some(spec.ty.decode(&path)?))
    }

    /// Like [`Object::get`], for attributes a valid object always carries.
    pub fn require(&self, attribute: &str) -> Result<AttributeValue> {
        self.get(attribute)?.ok_or_else(|| Error::Corrupt {
            path: self.describe(),
            reason: format!("missing {}", attribute),
        })
    }

    pub(crate) fn text(&self, attribute: &str) -> Result<String> {
        let value = self.require(attribute)?;
        value.into_text().ok_or_else(|| self.shape_error(attribute))
    }

    pub(crate) fn reference_attribute(&self, attribute: &str) -> Result<Option<Reference>> {
        match self.get(attribute)? {
            Some(value) => value
                .into_reference()
                .map(Some)
                .ok_or_else(|| self.shape_error(attribute)),
            None => Ok(None),
        }
    }

    pub(crate) fn blob(&self, attribute: &str) -> Result<Option<Blob>> {
        match self.get(attribute)? {
            Some(value) => value
                .into_blob()
                .map(Some)
                .ok_or_else(|| self.shape_error(attribute)),
            None => Ok(None),
        }
    }

    fn shape_error(&self, attribute: &str) -> Error {
        Error::Corrupt {
            path: self.describe(),
            reason: format!("{} decoded to the wrong shape", attribute),
        }
    }

    fn describe(&self) -> String {
        match self.reference() {
            Some(reference) => reference.to_string(),
            None => format!("new {}", self.kind),
        }
    }

    /// Writes one attribute into the staging area, entering staging first if
    /// necessary.
    pub fn set(&mut self, attribute: &str, value: impl Into<AttributeValue>) -> Result<()> {
        let spec = self.spec(attribute)?;
        self.stage()?;
        let Some(dir) = self.staging_dir() else {
            return Err(Error::corrupt(
                &self.store.stage_dir(self.kind),
                "staging vanished",
            ));
        };
        let path = dir.join(spec.ty.file_name(attribute));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        log::debug!("setting {} on {}", attribute, self.describe());
        spec.ty.encode(attribute, &value.into(), &path)
    }

    /// Validates the staged attributes and moves them to their canonical
    /// place, deriving the id from the contents where the kind asks for it.
    /// Publishing with nothing staged just returns the reference.
    pub fn publish(&mut self) -> Result<Reference> {
        let Some(mut session) = self.staging.take() else {
            return self.reference().ok_or_else(|| Error::IncompleteObject {
                kind: self.kind,
                missing: Attributes(vec![String::from("id")]),
            });
        };
        session.release_lock()?;

        let present = digest::attributes(session.dir())?;
        self.kind
            .schema()
            .validate(self.kind, &present, session.dir())?;

        let id = match self.kind.schema().mode {
            ReferenceMode::ContentDerived => digest::canonical_digest(session.dir())?,
            ReferenceMode::Named => self.id.clone().ok_or_else(|| Error::IncompleteObject {
                kind: self.kind,
                missing: Attributes(vec![String::from("id")]),
            })?,
        };
        let reference = Reference::new(self.kind, id.clone())?;
        session.relocate(&self.store.object_dir(&reference))?;
        self.id = Some(id);
        log::info!("published {}", reference);
        Ok(reference)
    }
}
