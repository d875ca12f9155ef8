use super::*;

/// Toy nesting structure shaped like a chain of nested blocks.
enum Nest {
    Leaf(u32),
    Inner(Box<Nest>),
}

fn build(depth: u32) -> Nest {
    let mut node = Nest::Leaf(depth);
    for _ in 0..depth {
        node = Nest::Inner(Box::new(node));
    }
    node
}

fn depth_of(node: &Nest) -> u32 {
    ensure_sufficient_stack(|| match node {
        Nest::Leaf(_) => 0,
        Nest::Inner(inner) => depth_of(inner) + 1,
    })
}

fn leaf_of(node: &Nest) -> u32 {
    ensure_sufficient_stack(|| match node {
        Nest::Leaf(v) => *v,
        Nest::Inner(inner) => leaf_of(inner),
    })
}

#[test]
fn shallow_nesting() {
    let tree = build(8);
    assert_eq!(depth_of(&tree), 8);
    assert_eq!(leaf_of(&tree), 8);
}

#[test]
fn deep_nesting_does_not_overflow() {
    let mut tree = build(200_000);
    assert_eq!(depth_of(&tree), 200_000);

    // Unwind iteratively so the default recursive drop does not overflow.
    while let Nest::Inner(inner) = tree {
        tree = *inner;
    }
}

#[test]
fn propagates_results() {
    let ok: Result<u8, String> = ensure_sufficient_stack(|| Ok(7));
    assert_eq!(ok, Ok(7));
}
