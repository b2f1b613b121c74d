//! Splitting fragment scripts into bounded pieces.

/// Piece size target. Statements are batched up to roughly this many bytes
/// so a poison check runs between pieces and no single engine call exceeds
/// packet limits.
pub const PIECE_TARGET_BYTES: usize = 25 * 1024;

/// Split a semicolon-separated script into executable pieces of at most
/// `target_bytes` each (a single oversized statement still becomes its own
/// piece). Statement boundaries are never broken.
pub fn split_into_pieces(script: &str, target_bytes: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for stmt in script.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + stmt.len() + 1 > target_bytes {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(';');
        }
        current.push_str(stmt);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_to_target() {
        let script = "SELECT 1; SELECT 2; SELECT 3;";
        // Tiny target: every statement is its own piece.
        assert_eq!(
            split_into_pieces(script, 1),
            vec!["SELECT 1", "SELECT 2", "SELECT 3"]
        );
        // Large target: one combined piece.
        assert_eq!(
            split_into_pieces(script, 1024),
            vec!["SELECT 1;SELECT 2;SELECT 3"]
        );
        assert!(split_into_pieces(" ; ;; ", 1024).is_empty());
    }
}
