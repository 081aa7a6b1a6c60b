use std::{
    any::TypeId,
    collections::HashMap,
    sync::Arc,
};

use tracing::debug;

use super::{Definition, DefinitionBuilder, DefinitionError, Record, SchemaNames};

/// What to do when a type is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedefinitionPolicy {
    #[default]
    Reject,
    Replace,
}

/// Process-wide map from record type to its [`Definition`].
///
/// Populated once at startup, then frozen into an `Arc` and shared read-only
/// by every repository.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    schemas: SchemaNames,
    policy: RedefinitionPolicy,
    definitions: HashMap<TypeId, Arc<Definition>>,
}

impl DefinitionRegistry {
    pub fn new(schemas: SchemaNames, policy: RedefinitionPolicy) -> Self {
        Self {
            schemas,
            policy,
            definitions: HashMap::new(),
        }
    }

    pub fn schemas(&self) -> &SchemaNames {
        &self.schemas
    }

    /// Registers the definition of `T`, built by `define`.
    pub fn register<T: Record>(
        &mut self,
        define: impl FnOnce(&mut DefinitionBuilder<T>) -> Result<(), DefinitionError>,
    ) -> Result<&mut Self, DefinitionError> {
        let type_id = TypeId::of::<T>();
        if self.policy == RedefinitionPolicy::Reject && self.definitions.contains_key(&type_id) {
            return Err(DefinitionError::DefinitionAlreadyRegistered {
                entity: T::NAME.to_string(),
            });
        }

        let mut builder = DefinitionBuilder::<T>::new(self.schemas.clone())?;
        define(&mut builder)?;
        let definition = builder.build();

        debug!(
            "Registered definition for {}: {} column(s), {} foreign key(s), translation: {}, history: {}",
            definition.entity,
            definition.columns.len(),
            definition.foreign_keys.len(),
            definition.has_translation,
            definition.has_history,
        );

        self.definitions.insert(type_id, Arc::new(definition));
        Ok(self)
    }

    pub fn get<T: Record>(&self) -> Result<Arc<Definition>, DefinitionError> {
        self.get_by_type_id(TypeId::of::<T>(), T::NAME)
    }

    pub fn get_by_type_id(
        &self,
        type_id: TypeId,
        name: &str,
    ) -> Result<Arc<Definition>, DefinitionError> {
        self.definitions
            .get(&type_id)
            .cloned()
            .ok_or_else(|| DefinitionError::DefinitionNotFound {
                entity: name.to_string(),
            })
    }

    pub fn contains<T: Record>(&self) -> bool {
        self.definitions.contains_key(&TypeId::of::<T>())
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<Definition>> {
        self.definitions.values()
    }

    /// Checks every edge points at a registered type and makes the registry
    /// read-only.
    pub fn freeze(self) -> Result<Arc<Self>, DefinitionError> {
        for definition in self.definitions.values() {
            for edge in &definition.foreign_keys {
                if !self.definitions.contains_key(&edge.referenced_type) {
                    return Err(DefinitionError::MissingForeignDefinition {
                        entity: definition.entity.to_string(),
                        edge: edge.name.clone(),
                        referenced: edge.referenced.to_string(),
                    });
                }
            }

            if let Some(cross) = &definition.cross_reference {
                for side in [&cross.a, &cross.b] {
                    if !self.definitions.contains_key(&side.type_id) {
                        return Err(DefinitionError::MissingForeignDefinition {
                            entity: definition.entity.to_string(),
                            edge: side.local_property.to_string(),
                            referenced: side.entity.to_string(),
                        });
                    }
                }
            }
        }

        debug!("Froze registry with {} definition(s)", self.definitions.len());
        Ok(Arc::new(self))
    }
}
