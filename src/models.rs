//! Modelos de dominio (trozos de texto y elementos del grafo médico).

use serde::{Deserialize, Serialize};

/// Etiquetas de nodo permitidas en el grafo. El modelo solo puede extraer
/// entidades de estas seis clases.
pub const ALLOWED_NODE_LABELS: [&str; 6] =
    ["Patient", "Disease", "Medication", "Test", "Symptom", "Doctor"];

/// Tipos de relación permitidos entre las entidades anteriores.
pub const ALLOWED_RELATIONSHIP_TYPES: [&str; 6] = [
    "HAS_DISEASE",
    "TAKES_MEDICATION",
    "UNDERWENT_TEST",
    "HAS_SYMPTOM",
    "TREATED_BY",
    "PRESCRIBED",
];

/// Un trozo del texto extraído del PDF, listo para el transformador.
/// El texto va sin saltos de línea y lleva el nombre del fichero de origen.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
}

/// Una entidad extraída por el modelo. Sin propiedades adicionales:
/// solo identificador y etiqueta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
}

/// Una relación extraída por el modelo, referida a los nodos por su id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
}

/// El resultado de transformar un trozo: sus nodos y relaciones más el
/// propio trozo para poder enlazar la procedencia en el grafo.
#[derive(Debug, Clone)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    pub source: DocumentChunk,
}

impl GraphDocument {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulario_tiene_seis_y_seis() {
        assert_eq!(ALLOWED_NODE_LABELS.len(), 6);
        assert_eq!(ALLOWED_RELATIONSHIP_TYPES.len(), 6);
    }

    #[test]
    fn relacion_se_deserializa_con_type() {
        let rel: GraphRelationship = serde_json::from_str(
            r#"{"source": "Juan Pérez", "target": "Diabetes", "type": "HAS_DISEASE"}"#,
        )
        .unwrap();
        assert_eq!(rel.rel_type, "HAS_DISEASE");
    }

    #[test]
    fn documento_sin_elementos_esta_vacio() {
        let doc = GraphDocument {
            nodes: vec![],
            relationships: vec![],
            source: DocumentChunk {
                text: "texto".into(),
                source: "informe.pdf".into(),
            },
        };
        assert!(doc.is_empty());
    }
}
