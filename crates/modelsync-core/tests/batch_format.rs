#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use modelsync_core::{Assembler, EntityCache, MessageBus, MutationSession, Record};
use uuid::Uuid;

#[test]
fn batch_wire_shape() {
    let asm = Assembler::new(Arc::new(EntityCache::<Record>::new()), MessageBus::new());
    let x = Uuid::from_u128(1);
    let y = Uuid::from_u128(2);
    let param = Uuid::from_u128(3);
    asm.ingest(
        None,
        Record::with_iid(param, "Parameter")
            .with_revision(4)
            .with_field("name", "mass"),
    );

    let mut session = MutationSession::begin(Arc::clone(asm.cache()));
    session.stage(param).unwrap().set_field("name", "weight");
    session
        .stage_new(Record::with_iid(x, "Term").with_link("see_also", y))
        .unwrap();
    session
        .stage_new(Record::with_iid(y, "Term").with_link("see_also", x))
        .unwrap();
    let batch = session.finalize().unwrap();

    insta::assert_json_snapshot!(batch, {
        ".id" => "[batch]",
        ".session" => "[session]",
        ".cache" => "[cache]",
        ".created_at" => "[timestamp]",
    }, @r#"
    {
      "id": "[batch]",
      "session": "[session]",
      "cache": "[cache]",
      "created_at": "[timestamp]",
      "operations": [
        {
          "kind": "update",
          "iid": "00000000-0000-0000-0000-000000000003",
          "class_kind": "Parameter",
          "payload": {
            "iid": "00000000-0000-0000-0000-000000000003",
            "revision": 4,
            "class_kind": "Parameter",
            "fields": {
              "name": "weight"
            }
          },
          "token": 4
        },
        {
          "kind": "create",
          "iid": "00000000-0000-0000-0000-000000000001",
          "class_kind": "Term",
          "payload": {
            "iid": "00000000-0000-0000-0000-000000000001",
            "revision": 0,
            "class_kind": "Term"
          },
          "token": null,
          "deferred_references": [
            "00000000-0000-0000-0000-000000000002"
          ]
        },
        {
          "kind": "create",
          "iid": "00000000-0000-0000-0000-000000000002",
          "class_kind": "Term",
          "payload": {
            "iid": "00000000-0000-0000-0000-000000000002",
            "revision": 0,
            "class_kind": "Term",
            "links": {
              "see_also": [
                "00000000-0000-0000-0000-000000000001"
              ]
            }
          },
          "token": null
        },
        {
          "kind": "update",
          "iid": "00000000-0000-0000-0000-000000000001",
          "class_kind": "Term",
          "payload": {
            "iid": "00000000-0000-0000-0000-000000000001",
            "revision": 0,
            "class_kind": "Term",
            "links": {
              "see_also": [
                "00000000-0000-0000-0000-000000000002"
              ]
            }
          },
          "token": null
        }
      ]
    }
    "#);
}
