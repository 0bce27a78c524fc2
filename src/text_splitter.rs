//! Partición recursiva de texto en trozos con solapamiento.
//!
//! Divide primero por párrafos, luego por líneas, palabras y caracteres,
//! y va empaquetando los fragmentos hasta el tamaño objetivo manteniendo
//! una ventana de solapamiento entre trozos consecutivos.

use tracing::warn;

/// Tamaño objetivo de cada trozo, medido en caracteres.
pub const CHUNK_SIZE: usize = 200;
/// Solapamiento entre trozos consecutivos, en caracteres.
pub const CHUNK_OVERLAP: usize = 40;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, CHUNK_OVERLAP)
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }

    /// Divide el texto completo en trozos de como mucho `chunk_size`
    /// caracteres (salvo fragmentos indivisibles más largos).
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with_separators(text, &SEPARATORS)
    }

    fn split_with_separators(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // Primer separador que aparece en el texto; el resto quedan para
        // la recursión sobre fragmentos todavía demasiado grandes.
        let mut separator = *separators.last().unwrap_or(&"");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = *sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits = split_on_separator(text, separator);
        // Los fragmentos ya llevan su separador pegado, así que el
        // empaquetado los une sin separador adicional.
        let joiner = "";

        let mut good_splits: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.chunk_size {
                good_splits.push(piece);
            } else {
                if !good_splits.is_empty() {
                    final_chunks.extend(self.merge_splits(&good_splits, joiner));
                    good_splits.clear();
                }
                if remaining.is_empty() {
                    final_chunks.push(piece);
                } else {
                    final_chunks.extend(self.split_with_separators(&piece, remaining));
                }
            }
        }
        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, joiner));
        }

        final_chunks
    }

    /// Empaqueta fragmentos pequeños en trozos de hasta `chunk_size`,
    /// arrastrando una ventana de solapamiento de `chunk_overlap`.
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);
            let joint = if current.is_empty() { 0 } else { separator_len };

            if total + len + joint > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Se generó un trozo de {} caracteres, mayor que el objetivo de {}",
                        total, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    if let Some(doc) = join_pieces(&current, separator) {
                        docs.push(doc);
                    }
                    // Retira fragmentos por delante hasta quedarnos con la
                    // ventana de solapamiento.
                    while total > self.chunk_overlap
                        || (total + len + joint > self.chunk_size && total > 0)
                    {
                        let head = char_len(&current[0])
                            + if current.len() > 1 { separator_len } else { 0 };
                        total -= head;
                        current.remove(0);
                    }
                }
            }

            current.push(piece.clone());
            total += len + if current.len() > 1 { separator_len } else { 0 };
        }

        if let Some(doc) = join_pieces(&current, separator) {
            docs.push(doc);
        }

        docs
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_pieces(pieces: &[String], separator: &str) -> Option<String> {
    let doc = pieces.join(separator).trim().to_string();
    if doc.is_empty() {
        None
    } else {
        Some(doc)
    }
}

/// Divide por el separador dejándolo pegado al principio del fragmento
/// siguiente, para no perder caracteres del texto original.
fn split_on_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        if i == 0 {
            pieces.push(part.to_string());
        } else {
            pieces.push(format!("{separator}{part}"));
        }
    }
    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texto_corto_queda_en_un_trozo() {
        let splitter = TextSplitter::default();
        let chunks = splitter.split("El paciente presenta fiebre.");
        assert_eq!(chunks, vec!["El paciente presenta fiebre.".to_string()]);
    }

    #[test]
    fn texto_vacio_no_produce_trozos() {
        let splitter = TextSplitter::default();
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn respeta_el_tamano_maximo() {
        let splitter = TextSplitter::new(50, 10);
        let text = "palabra ".repeat(40);
        for chunk in splitter.split(&text) {
            assert!(chunk.chars().count() <= 50, "trozo demasiado largo: {chunk:?}");
        }
    }

    #[test]
    fn trozos_consecutivos_se_solapan() {
        let splitter = TextSplitter::new(50, 20);
        let text = "uno dos tres cuatro cinco seis siete ocho nueve diez once doce trece catorce quince";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        // La ventana de solapamiento repite la cola del trozo anterior, así
        // que la primera palabra de cada trozo ya apareció en el previo.
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "sin solapamiento entre {:?} y {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn prefiere_cortar_por_parrafos() {
        let splitter = TextSplitter::new(30, 0);
        let text = "Primer párrafo corto.\n\nSegundo párrafo corto.";
        let chunks = splitter.split(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Primer párrafo corto.");
        assert_eq!(chunks[1], "Segundo párrafo corto.");
    }

    #[test]
    fn palabra_indivisible_se_trocea_por_caracteres() {
        let splitter = TextSplitter::new(10, 0);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn mide_en_caracteres_y_no_en_bytes() {
        let splitter = TextSplitter::new(20, 0);
        let text = "ácido úrico elevado según análisis de París";
        for chunk in splitter.split(text) {
            assert!(chunk.chars().count() <= 20);
        }
    }
}
