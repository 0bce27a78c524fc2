//! Transformación de trozos de texto en documentos de grafo mediante el LLM,
//! restringida al vocabulario médico fijo de la aplicación.

use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

use crate::llm::{clean_fenced_response, GeminiChat};
use crate::models::{
    DocumentChunk, GraphDocument, GraphNode, GraphRelationship, ALLOWED_NODE_LABELS,
    ALLOWED_RELATIONSHIP_TYPES,
};

// --- Estructuras para la salida JSON del modelo ---

#[derive(Debug, Clone, Deserialize, Default)]
struct RawExtraction {
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNode {
    id: String,
    label: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(rename = "type")]
    rel_type: String,
}

/// Convierte trozos de texto clínico en nodos y relaciones del grafo.
/// Sin propiedades en nodos ni relaciones: solo identificador, etiqueta y tipo.
pub struct GraphTransformer {
    chat: GeminiChat,
    prompt: String,
}

impl GraphTransformer {
    pub fn new(chat: GeminiChat) -> Self {
        Self { chat, prompt: extraction_prompt() }
    }

    /// Pide al modelo el grafo de un trozo y filtra la salida al vocabulario.
    pub async fn convert_chunk(&self, chunk: &DocumentChunk) -> Result<GraphDocument> {
        let response = self.chat.generate(Some(&self.prompt), &chunk.text).await?;
        let raw = parse_extraction(&response);
        Ok(filter_to_vocabulary(raw, chunk))
    }
}

fn extraction_prompt() -> String {
    format!(
        r#"You are a medical information extraction expert building a knowledge graph from clinical documents.
Extract entities and relationships from the text provided by the user.

Allowed node labels: {labels}.
Allowed relationship types: {rel_types}.

Rules:
- Use only the allowed labels and relationship types; ignore anything that does not fit them.
- A node "id" is the entity name exactly as written in the text.
- Do not attach any properties to nodes or relationships.
- Relationships refer to nodes by their "id".
- If nothing can be extracted, return empty lists.

Respond with a single JSON object and no explanations:
{{"nodes": [{{"id": "...", "label": "..."}}], "relationships": [{{"source": "...", "target": "...", "type": "..."}}]}}"#,
        labels = ALLOWED_NODE_LABELS.join(", "),
        rel_types = ALLOWED_RELATIONSHIP_TYPES.join(", "),
    )
}

/// Limpia la respuesta del modelo y la parsea. Si el JSON no es válido se
/// devuelve una extracción vacía para no detener el resto del proceso.
fn parse_extraction(response: &str) -> RawExtraction {
    let cleaned = clean_fenced_response(response);
    match serde_json::from_str::<RawExtraction>(cleaned) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "No se pudo parsear el JSON de extracción de un trozo. Error: {e}. Respuesta: '{response}'"
            );
            RawExtraction::default()
        }
    }
}

/// Descarta nodos con etiqueta fuera del vocabulario y relaciones con tipo no
/// permitido o con extremos que apunten a nodos descartados. También elimina
/// duplicados para que los contadores del resumen sean fieles.
fn filter_to_vocabulary(raw: RawExtraction, chunk: &DocumentChunk) -> GraphDocument {
    let mut nodes: Vec<GraphNode> = Vec::new();
    for node in raw.nodes {
        if !ALLOWED_NODE_LABELS.contains(&node.label.as_str()) {
            warn!("Nodo descartado por etiqueta fuera del vocabulario: {:?}", node.label);
            continue;
        }
        let candidate = GraphNode { id: node.id, label: node.label };
        if !nodes.contains(&candidate) {
            nodes.push(candidate);
        }
    }

    let mut relationships: Vec<GraphRelationship> = Vec::new();
    for rel in raw.relationships {
        if !ALLOWED_RELATIONSHIP_TYPES.contains(&rel.rel_type.as_str()) {
            warn!("Relación descartada por tipo fuera del vocabulario: {:?}", rel.rel_type);
            continue;
        }
        let endpoints_known = nodes.iter().any(|n| n.id == rel.source)
            && nodes.iter().any(|n| n.id == rel.target);
        if !endpoints_known {
            warn!(
                "Relación descartada por extremos desconocidos: {} -[{}]-> {}",
                rel.source, rel.rel_type, rel.target
            );
            continue;
        }
        let candidate = GraphRelationship {
            source: rel.source,
            target: rel.target,
            rel_type: rel.rel_type,
        };
        if !relationships.contains(&candidate) {
            relationships.push(candidate);
        }
    }

    GraphDocument { nodes, relationships, source: chunk.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> DocumentChunk {
        DocumentChunk { text: "texto clínico".into(), source: "informe.pdf".into() }
    }

    #[test]
    fn el_prompt_lista_el_vocabulario_completo() {
        let prompt = extraction_prompt();
        for label in ALLOWED_NODE_LABELS {
            assert!(prompt.contains(label));
        }
        for rel in ALLOWED_RELATIONSHIP_TYPES {
            assert!(prompt.contains(rel));
        }
    }

    #[test]
    fn parsea_una_extraccion_con_valla() {
        let response = r#"```json
{"nodes": [{"id": "Juan Pérez", "label": "Patient"}],
 "relationships": []}
```"#;
        let raw = parse_extraction(response);
        assert_eq!(raw.nodes.len(), 1);
        assert_eq!(raw.nodes[0].label, "Patient");
    }

    #[test]
    fn json_invalido_produce_extraccion_vacia() {
        let raw = parse_extraction("esto no es JSON");
        assert!(raw.nodes.is_empty());
        assert!(raw.relationships.is_empty());
    }

    #[test]
    fn filtra_etiquetas_fuera_del_vocabulario() {
        let raw = RawExtraction {
            nodes: vec![
                RawNode { id: "Juan Pérez".into(), label: "Patient".into() },
                RawNode { id: "Hospital Central".into(), label: "Hospital".into() },
            ],
            relationships: vec![],
        };
        let doc = filter_to_vocabulary(raw, &chunk());
        assert_eq!(doc.nodes.len(), 1);
        assert_eq!(doc.nodes[0].label, "Patient");
    }

    #[test]
    fn filtra_tipos_de_relacion_no_permitidos() {
        let raw = RawExtraction {
            nodes: vec![
                RawNode { id: "Juan Pérez".into(), label: "Patient".into() },
                RawNode { id: "Diabetes".into(), label: "Disease".into() },
            ],
            relationships: vec![
                RawRelationship {
                    source: "Juan Pérez".into(),
                    target: "Diabetes".into(),
                    rel_type: "HAS_DISEASE".into(),
                },
                RawRelationship {
                    source: "Juan Pérez".into(),
                    target: "Diabetes".into(),
                    rel_type: "SUFFERS_FROM".into(),
                },
            ],
        };
        let doc = filter_to_vocabulary(raw, &chunk());
        assert_eq!(doc.relationships.len(), 1);
        assert_eq!(doc.relationships[0].rel_type, "HAS_DISEASE");
    }

    #[test]
    fn una_relacion_a_un_nodo_descartado_cae_con_el() {
        let raw = RawExtraction {
            nodes: vec![
                RawNode { id: "Juan Pérez".into(), label: "Patient".into() },
                RawNode { id: "Hospital Central".into(), label: "Hospital".into() },
            ],
            relationships: vec![RawRelationship {
                source: "Juan Pérez".into(),
                target: "Hospital Central".into(),
                rel_type: "TREATED_BY".into(),
            }],
        };
        let doc = filter_to_vocabulary(raw, &chunk());
        assert!(doc.relationships.is_empty());
    }

    #[test]
    fn elimina_duplicados() {
        let raw = RawExtraction {
            nodes: vec![
                RawNode { id: "Paracetamol".into(), label: "Medication".into() },
                RawNode { id: "Paracetamol".into(), label: "Medication".into() },
            ],
            relationships: vec![],
        };
        let doc = filter_to_vocabulary(raw, &chunk());
        assert_eq!(doc.nodes.len(), 1);
    }

    #[test]
    fn conserva_el_trozo_de_origen() {
        let doc = filter_to_vocabulary(RawExtraction::default(), &chunk());
        assert_eq!(doc.source.source, "informe.pdf");
        assert!(doc.is_empty());
    }
}
