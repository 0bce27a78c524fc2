//! Conexión a Neo4j, constraints del esquema médico, vaciado del grafo e
//! introspección del esquema para los prompts de Cypher.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

use crate::config::SessionCredentials;
use crate::models::ALLOWED_NODE_LABELS;

/// Abre la conexión con las credenciales de la sesión. La consulta trivial
/// final confirma alcanzabilidad y credenciales antes de dar la conexión
/// por buena.
pub async fn connect(credentials: &SessionCredentials) -> Result<Graph> {
    let url = Url::parse(&credentials.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let config = neo4rs::ConfigBuilder::new()
        .uri(&addr)
        .user(&credentials.neo4j_username)
        .password(&credentials.neo4j_password)
        .db(&credentials.neo4j_database)
        .build()?;
    let graph = Graph::connect(config).await?;
    graph.run(query("RETURN 1")).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints de unicidad para las seis etiquetas médicas y para los
/// nodos :Document que guardan la procedencia de cada trozo.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let mut statements: Vec<String> = ALLOWED_NODE_LABELS
        .iter()
        .map(|label| {
            format!(
                "CREATE CONSTRAINT {}_id IF NOT EXISTS FOR (n:{label}) REQUIRE n.id IS UNIQUE",
                label.to_lowercase()
            )
        })
        .collect();
    statements.push(
        "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE"
            .to_string(),
    );

    for stmt in &statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints de unicidad creados).");
    Ok(())
}

/// Vacía el grafo por completo. Cada PDF procesado reemplaza todo el
/// contenido anterior, nunca se acumula.
pub async fn clear_graph(graph: &Graph) -> Result<()> {
    info!("Vaciando el grafo antes de la nueva carga...");
    graph.run(query("MATCH (n) DETACH DELETE n")).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Introspección del esquema
// ---------------------------------------------------------------------------

const NODE_PROPERTIES_QUERY: &str = "
CALL db.schema.nodeTypeProperties()
YIELD nodeLabels, propertyName, propertyTypes
UNWIND nodeLabels AS label
RETURN DISTINCT label, propertyName, propertyTypes[0] AS propertyType
";

const REL_PROPERTIES_QUERY: &str = "
CALL db.schema.relTypeProperties()
YIELD relType, propertyName, propertyTypes
RETURN DISTINCT relType, propertyName, propertyTypes[0] AS propertyType
";

const RELATIONSHIPS_QUERY: &str = "
CALL db.schema.visualization()
YIELD relationships
UNWIND relationships AS rel
RETURN DISTINCT labels(startNode(rel))[0] AS start, type(rel) AS relType,
       labels(endNode(rel))[0] AS end
";

/// Esquema vivo de la base, en la forma que esperan los prompts de
/// generación de Cypher.
#[derive(Debug, Clone, Default)]
pub struct GraphSchema {
    pub node_properties: BTreeMap<String, Vec<(String, String)>>,
    pub relationship_properties: BTreeMap<String, Vec<(String, String)>>,
    pub relationships: Vec<(String, String, String)>,
}

impl fmt::Display for GraphSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node properties are the following:")?;
        for (label, props) in &self.node_properties {
            writeln!(f, "{label} {{{}}}", render_properties(props))?;
        }
        writeln!(f, "Relationship properties are the following:")?;
        for (rel_type, props) in &self.relationship_properties {
            writeln!(f, "{rel_type} {{{}}}", render_properties(props))?;
        }
        writeln!(f, "The relationships are the following:")?;
        for (start, rel_type, end) in &self.relationships {
            writeln!(f, "(:{start})-[:{rel_type}]->(:{end})")?;
        }
        Ok(())
    }
}

fn render_properties(props: &[(String, String)]) -> String {
    props
        .iter()
        .map(|(name, ty)| format!("{name}: {ty}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lee el esquema real de la base con los procedimientos `db.schema.*`,
/// sin depender de APOC.
pub async fn fetch_schema(graph: &Graph) -> Result<GraphSchema> {
    let mut schema = GraphSchema::default();

    let mut rows = graph.execute(query(NODE_PROPERTIES_QUERY)).await?;
    while let Some(row) = rows.next().await? {
        let Some(label) = row.get::<String>("label") else { continue };
        let Some(name) = row.get::<String>("propertyName") else { continue };
        let raw_type = row
            .get::<String>("propertyType")
            .unwrap_or_else(|| "String".to_string());
        schema
            .node_properties
            .entry(label)
            .or_default()
            .push((name, normalize_property_type(&raw_type)));
    }

    let mut rows = graph.execute(query(REL_PROPERTIES_QUERY)).await?;
    while let Some(row) = rows.next().await? {
        let Some(rel_type) = row.get::<String>("relType") else { continue };
        let Some(name) = row.get::<String>("propertyName") else { continue };
        let raw_type = row
            .get::<String>("propertyType")
            .unwrap_or_else(|| "String".to_string());
        schema
            .relationship_properties
            .entry(clean_rel_type(&rel_type))
            .or_default()
            .push((name, normalize_property_type(&raw_type)));
    }

    let mut rows = graph.execute(query(RELATIONSHIPS_QUERY)).await?;
    while let Some(row) = rows.next().await? {
        let (Some(start), Some(rel_type), Some(end)) = (
            row.get::<String>("start"),
            row.get::<String>("relType"),
            row.get::<String>("end"),
        ) else {
            continue;
        };
        let triple = (start, rel_type, end);
        if !schema.relationships.contains(&triple) {
            schema.relationships.push(triple);
        }
    }

    Ok(schema)
}

/// `db.schema.relTypeProperties` devuelve los tipos como «:`NOMBRE`».
fn clean_rel_type(raw: &str) -> String {
    raw.trim_matches(|c| c == ':' || c == '`').to_string()
}

/// Traduce los nombres de tipo internos de Neo4j a los que usan los
/// prompts (Long pasa a INTEGER, Double a FLOAT, los arrays a LIST).
fn normalize_property_type(raw: &str) -> String {
    match raw {
        "Long" => "INTEGER".to_string(),
        "Double" => "FLOAT".to_string(),
        "String" => "STRING".to_string(),
        "Boolean" => "BOOLEAN".to_string(),
        t if t.ends_with("Array") => "LIST".to_string(),
        other => other.to_uppercase(),
    }
}
