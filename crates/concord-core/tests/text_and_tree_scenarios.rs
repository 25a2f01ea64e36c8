//! End-to-end scenarios for rich text and tree editing across
//! replicas. Changes travel between documents as encoded change packs.

use concord_core::codec;
use concord_core::document::{ChangePack, Checkpoint, TreeContent};
use concord_core::time::{ActorId, TimeTicket};
use concord_core::Document;
use serde_json::json;

fn actor(b: u8) -> ActorId {
    ActorId([b; 12])
}

/// Ships every buffered change of `from` to `to` through the binary
/// codec. Re-delivery is safe; documents dedupe by actor lamport.
fn relay(from: &Document, to: &mut Document) {
    let pack = ChangePack::new(
        from.key().to_string(),
        Checkpoint::INITIAL,
        from.create_change_pack().changes,
    );
    let bytes = codec::encode_change_pack(&pack).expect("pack must encode");
    let decoded = codec::decode_change_pack(&bytes).expect("pack must decode");
    to.apply_change_pack(&decoded).expect("pack must apply");
}

fn child_id(doc: &Document, key: &str) -> TimeTicket {
    doc.root()
        .object(TimeTicket::INITIAL)
        .unwrap()
        .rht
        .get(key)
        .expect("key must exist")
}

#[test]
fn text_insert_then_split_in_middle() {
    let mut doc = Document::new("scenario-1");
    doc.activate(actor(1));
    doc.update(Some("init"), |root| {
        root.new_text("t")?.edit(0, 0, "helloyorkie")?;
        Ok(())
    })
    .unwrap();
    doc.update(None, |root| root.text("t")?.edit(5, 5, "~"))
        .unwrap();

    assert_eq!(doc.to_json(), json!({"t": "hello~yorkie"}));
    let text = doc.root().text(child_id(&doc, "t")).unwrap();
    assert_eq!(text.rga.live_node_count(), 3);
    let runs: Vec<String> = text.runs().into_iter().map(|(c, _)| c).collect();
    assert_eq!(runs, ["hello", "~", "yorkie"]);
}

#[test]
fn concurrent_inserts_at_same_origin_tie_break() {
    let mut doc_a = Document::new("scenario-2");
    let mut doc_b = Document::new("scenario-2");
    doc_a.activate(actor(1));
    doc_b.activate(actor(2));

    doc_a
        .update(None, |root| {
            root.new_text("t")?;
            Ok(())
        })
        .unwrap();
    relay(&doc_a, &mut doc_b);

    // Same lamport, different actors: both edit position 0.
    doc_a
        .update(None, |root| root.text("t")?.edit(0, 0, "A"))
        .unwrap();
    doc_b
        .update(None, |root| root.text("t")?.edit(0, 0, "B"))
        .unwrap();
    relay(&doc_a, &mut doc_b);
    relay(&doc_b, &mut doc_a);

    // The greater actor sorts left under the tie-break.
    assert_eq!(doc_a.to_json(), json!({"t": "BA"}));
    assert_eq!(doc_b.to_json(), doc_a.to_json());
}

#[test]
fn remote_delete_only_covers_observed_runs() {
    let mut doc_a = Document::new("scenario-3");
    let mut doc_b = Document::new("scenario-3");
    doc_a.activate(actor(1));
    doc_b.activate(actor(2));

    doc_a
        .update(None, |root| root.new_text("t")?.edit(0, 0, "ad"))
        .unwrap();
    relay(&doc_a, &mut doc_b);

    // A inserts inside the range B is about to delete; B has not seen
    // the insertion.
    doc_a
        .update(None, |root| root.text("t")?.edit(1, 1, "bc"))
        .unwrap();
    doc_b
        .update(None, |root| root.text("t")?.edit(0, 2, ""))
        .unwrap();

    relay(&doc_b, &mut doc_a);
    relay(&doc_a, &mut doc_b);

    // The gated delete spares the unobserved insertion.
    assert_eq!(doc_a.to_json(), json!({"t": "bc"}));
    assert_eq!(doc_b.to_json(), doc_a.to_json());
}

#[test]
fn tree_edit_merges_paragraphs_across_boundary() {
    let mut doc_a = Document::new("scenario-4");
    let mut doc_b = Document::new("scenario-4");
    doc_a.activate(actor(1));
    doc_b.activate(actor(2));

    doc_a
        .update(None, |root| {
            let mut tree = root.new_tree("t", "r")?;
            tree.edit(
                0,
                0,
                &[
                    TreeContent::element("p").with_children(vec![TreeContent::text("ab")]),
                    TreeContent::element("p").with_children(vec![TreeContent::text("cd")]),
                ],
            )?;
            Ok(())
        })
        .unwrap();
    relay(&doc_a, &mut doc_b);

    {
        let tree = doc_a.root().tree(child_id(&doc_a, "t")).unwrap();
        assert_eq!(tree.to_xml(), "<r><p>ab</p><p>cd</p></r>");
        assert_eq!(tree.size(), 8);
    }

    doc_a
        .update(None, |root| root.tree("t")?.edit(2, 6, &[]))
        .unwrap();
    relay(&doc_a, &mut doc_b);

    for doc in [&doc_a, &doc_b] {
        let tree = doc.root().tree(child_id(doc, "t")).unwrap();
        assert_eq!(tree.to_xml(), "<r><p>ad</p></r>");
        assert_eq!(tree.size(), 4);
    }
}

#[test]
fn concurrent_tree_inserts_converge() {
    let mut doc_a = Document::new("tree-concurrent");
    let mut doc_b = Document::new("tree-concurrent");
    doc_a.activate(actor(1));
    doc_b.activate(actor(2));

    doc_a
        .update(None, |root| {
            root.new_tree("t", "doc")?
                .edit(0, 0, &[TreeContent::element("p")])?;
            Ok(())
        })
        .unwrap();
    relay(&doc_a, &mut doc_b);

    doc_a
        .update(None, |root| {
            root.tree("t")?.edit(0, 0, &[TreeContent::element("b")])
        })
        .unwrap();
    doc_b
        .update(None, |root| {
            root.tree("t")?.edit(0, 0, &[TreeContent::element("i")])
        })
        .unwrap();
    relay(&doc_a, &mut doc_b);
    relay(&doc_b, &mut doc_a);

    let xml_a = doc_a.root().tree(child_id(&doc_a, "t")).unwrap().to_xml();
    let xml_b = doc_b.root().tree(child_id(&doc_b, "t")).unwrap().to_xml();
    assert_eq!(xml_a, xml_b);
    assert_eq!(xml_a, "<doc><i></i><b></b><p></p></doc>");
}

#[test]
fn text_style_replicates() {
    let mut doc_a = Document::new("style");
    let mut doc_b = Document::new("style");
    doc_a.activate(actor(1));
    doc_b.activate(actor(2));

    doc_a
        .update(None, |root| {
            let mut text = root.new_text("t")?;
            text.edit(0, 0, "hello world")?;
            text.style(0, 5, &[("bold", "true")])?;
            Ok(())
        })
        .unwrap();
    relay(&doc_a, &mut doc_b);

    for doc in [&doc_a, &doc_b] {
        let text = doc.root().text(child_id(doc, "t")).unwrap();
        let runs = text.runs();
        assert_eq!(runs[0].0, "hello");
        assert_eq!(runs[0].1.get("bold").unwrap(), "true");
        assert!(runs[1].1.is_empty());
    }
}

#[test]
fn failed_update_leaves_document_untouched() {
    let mut doc = Document::new("rollback");
    doc.activate(actor(1));
    doc.update(None, |root| root.set("kept", json!(1))).unwrap();

    let before = doc.to_json();
    let pending = doc.pending_change_count();
    let result = doc.update(None, |root| {
        root.set("discarded", json!(2))?;
        root.text("missing")?.edit(0, 0, "x")
    });
    assert!(result.is_err());
    assert_eq!(doc.to_json(), before);
    assert_eq!(doc.pending_change_count(), pending);
}

#[test]
fn utf16_indexing_is_enforced() {
    let mut doc = Document::new("utf16");
    doc.activate(actor(1));
    doc.update(None, |root| root.new_text("t")?.edit(0, 0, "a𝄞b"))
        .unwrap();
    // The surrogate pair occupies indices 1..3; splitting it fails.
    let err = doc
        .update(None, |root| root.text("t")?.edit(2, 2, "x"))
        .unwrap_err();
    assert!(matches!(err, concord_core::CoreError::OutOfRange(_)));
    assert_eq!(doc.to_json(), json!({"t": "a𝄞b"}));
    // Editing at the pair boundary works.
    doc.update(None, |root| root.text("t")?.edit(3, 3, "!"))
        .unwrap();
    assert_eq!(doc.to_json(), json!({"t": "a𝄞!b"}));
}
