use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{
    ColumnOptions, DefinitionRegistry, EdgeOptions, Entity, Field, RedefinitionPolicy, Record,
    ScalarType, SchemaNames,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    pub id: Uuid,
    pub name: String,
}

impl Record for Area {
    const NAME: &'static str = "Area";

    fn fields() -> Vec<Field> {
        vec![
            Field::scalar("id", ScalarType::Uuid),
            Field::scalar("name", ScalarType::Text),
        ]
    }
}

impl Entity for Area {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtArea {
    pub id: Uuid,
    pub name: String,
    pub packages: Vec<Package>,
}

impl Record for ExtArea {
    const NAME: &'static str = "ExtArea";

    fn fields() -> Vec<Field> {
        let mut fields = Area::fields();
        fields.push(Field::list::<Package>("packages"));
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub area_id: Option<Uuid>,
}

impl Record for Package {
    const NAME: &'static str = "Package";

    fn fields() -> Vec<Field> {
        vec![
            Field::scalar("id", ScalarType::Uuid),
            Field::scalar("name", ScalarType::Text),
            Field::nullable("description", ScalarType::Text),
            Field::nullable("areaId", ScalarType::Uuid),
        ]
    }
}

impl Entity for Package {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtPackage {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub area_id: Option<Uuid>,
    pub area: Option<Area>,
}

impl Record for ExtPackage {
    const NAME: &'static str = "ExtPackage";

    fn fields() -> Vec<Field> {
        let mut fields = Package::fields();
        fields.push(Field::nested::<Area>("area"));
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl Record for Resource {
    const NAME: &'static str = "Resource";

    fn fields() -> Vec<Field> {
        vec![
            Field::scalar("id", ScalarType::Uuid),
            Field::scalar("name", ScalarType::Text),
            Field::nullable("description", ScalarType::Text),
        ]
    }
}

impl Entity for Resource {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageResource {
    pub id: Uuid,
    pub package_id: Uuid,
    pub resource_id: Uuid,
}

impl Record for PackageResource {
    const NAME: &'static str = "PackageResource";

    fn fields() -> Vec<Field> {
        vec![
            Field::scalar("id", ScalarType::Uuid),
            Field::scalar("packageId", ScalarType::Uuid),
            Field::scalar("resourceId", ScalarType::Uuid),
        ]
    }
}

impl Entity for PackageResource {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtPackageResource {
    pub id: Uuid,
    pub package_id: Uuid,
    pub resource_id: Uuid,
    pub package: Package,
    pub resource: Resource,
}

impl Record for ExtPackageResource {
    const NAME: &'static str = "ExtPackageResource";

    fn fields() -> Vec<Field> {
        let mut fields = PackageResource::fields();
        fields.push(Field::nested::<Package>("package"));
        fields.push(Field::nested::<Resource>("resource"));
        fields
    }
}

/// The demo model: areas own packages, packages and resources are linked
/// through `PackageResource`.
pub fn test_registry(schemas: SchemaNames) -> Arc<DefinitionRegistry> {
    let mut registry = DefinitionRegistry::new(schemas, RedefinitionPolicy::Reject);

    registry
        .register::<Area>(|def| {
            def.history(true).translation(true);
            def.primary_key(&["id"])?
                .column("id")?
                .column_with("name", ColumnOptions::new().length(150))?
                .extended::<ExtArea, Package>("id", "areaId", "packages", EdgeOptions::new().list())?
                .unique(&["name"])?;
            Ok(())
        })
        .unwrap()
        .register::<Package>(|def| {
            def.history(true).translation(true);
            def.primary_key(&["id"])?
                .column("id")?
                .column_with("name", ColumnOptions::new().length(150))?
                .column("description")?
                .column("areaId")?
                .extended::<ExtPackage, Area>(
                    "areaId",
                    "id",
                    "area",
                    EdgeOptions::new().optional().cascade_delete(),
                )?
                .unique(&["name", "areaId"])?;
            Ok(())
        })
        .unwrap()
        .register::<Resource>(|def| {
            def.history(true).translation(true);
            def.primary_key(&["id"])?
                .column("id")?
                .column_with("name", ColumnOptions::new().length(150))?
                .column("description")?;
            Ok(())
        })
        .unwrap()
        .register::<PackageResource>(|def| {
            def.history(true);
            def.primary_key(&["packageId", "resourceId"])?
                .column("id")?
                .column("packageId")?
                .column("resourceId")?
                .cross_reference::<ExtPackageResource, Package, Resource>(
                    ("packageId", "id", "package"),
                    ("resourceId", "id", "resource"),
                )?;
            Ok(())
        })
        .unwrap();

    registry.freeze().unwrap()
}
