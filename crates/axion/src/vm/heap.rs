//! The heap: a slot arena with a free list and a mark-and-sweep collector.
//!
//! Objects live in stable slots addressed by [`HeapId`]; stack entries and
//! frame locals carry ids and never own the objects. The collector marks
//! from the roots the VM supplies (value stack plus every frame's locals)
//! and frees everything unmarked. Temporaries are additionally freed
//! eagerly when popped.

use super::object::{HeapObject, ObjectKind, Value};

/// Live object count that first triggers a suggested collection.
pub const GC_THRESHOLD_MIN: usize = 500;
/// The threshold stops growing here.
pub const GC_THRESHOLD_MAX: usize = 2000;
/// How much the threshold grows after each collection.
pub const GC_THRESHOLD_STEP: usize = 100;

/// Stable identity of a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    #[must_use]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena of heap objects.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free_list: Vec<HeapId>,
    live: usize,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    #[must_use]
    pub fn num_objects(&self) -> usize {
        self.live
    }

    /// Places an object into a slot, reusing freed slots first.
    pub fn allocate(&mut self, object: HeapObject) -> HeapId {
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            self.slots[id.index()] = Some(object);
            return id;
        }
        let id = HeapId(u32::try_from(self.slots.len()).expect("heap exceeds u32 slots"));
        self.slots.push(Some(object));
        id
    }

    /// Allocates a plain value with the given flags.
    pub fn allocate_value(&mut self, value: Value, temporary: bool, constant: bool) -> HeapId {
        let mut object = HeapObject::variable(value);
        object.temporary = temporary;
        object.constant = constant;
        self.allocate(object)
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapObject {
        self.slots[id.index()].as_ref().expect("stale heap id")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapObject {
        self.slots[id.index()].as_mut().expect("stale heap id")
    }

    /// Frees one slot immediately (used for temporaries at pop time).
    pub fn free(&mut self, id: HeapId) {
        if self.slots[id.index()].take().is_some() {
            self.live -= 1;
            self.free_list.push(id);
        }
    }

    /// Replaces the payload and fields of `target`, keeping its flags.
    ///
    /// This is assignment: every reference to the slot observes the new
    /// value.
    pub fn replace_object(&mut self, target: HeapId, kind: ObjectKind, fields: Vec<(String, HeapId)>) {
        let object = self.get_mut(target);
        object.kind = kind;
        object.fields = fields;
    }

    /// Deep-clones an object: a fresh slot for it and for every field,
    /// recursively. Flags reset on the clone.
    pub fn clone_object(&mut self, id: HeapId) -> HeapId {
        let (kind, fields) = {
            let object = self.get(id);
            (object.kind.clone(), object.fields.clone())
        };

        let cloned_fields = fields
            .into_iter()
            .map(|(name, field_id)| (name, self.clone_object(field_id)))
            .collect();

        self.allocate(HeapObject {
            temporary: false,
            constant: false,
            marked: false,
            fields: cloned_fields,
            kind,
        })
    }

    /// Renders an object for `print`, following structure fields.
    #[must_use]
    pub fn object_to_string(&self, id: HeapId) -> String {
        let object = self.get(id);
        match &object.kind {
            ObjectKind::Function(_) => "<func>".to_owned(),
            ObjectKind::Native(_) => "<native function>".to_owned(),
            ObjectKind::Variable(value) => {
                if let Some(text) = value.scalar_string() {
                    return text;
                }
                match value {
                    Value::Structure => {
                        let mut out = String::from("{");
                        for (i, (name, field_id)) in object.fields.iter().enumerate() {
                            out.push('"');
                            out.push_str(name);
                            out.push_str("\"=");
                            out.push_str(&self.object_to_string(*field_id));
                            if i + 1 < object.fields.len() {
                                out.push_str(", ");
                            }
                        }
                        out.push('}');
                        out
                    }
                    _ => format!("<{}>", value.type_string()),
                }
            }
        }
    }

    /// Marks every object reachable from the given roots.
    pub fn mark_from_roots(&mut self, roots: impl Iterator<Item = HeapId>) {
        let mut worklist: Vec<HeapId> = roots.collect();
        while let Some(id) = worklist.pop() {
            let Some(object) = self.slots[id.index()].as_mut() else {
                continue;
            };
            if object.marked {
                continue;
            }
            object.marked = true;
            worklist.extend(object.fields.iter().map(|(_, field_id)| *field_id));
        }
    }

    /// Frees every unmarked object and clears surviving marks. Returns how
    /// many objects were collected.
    pub fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for index in 0..self.slots.len() {
            let survives = match &mut self.slots[index] {
                Some(object) if object.marked => {
                    object.marked = false;
                    true
                }
                Some(_) => false,
                None => true,
            };
            if !survives {
                self.slots[index] = None;
                self.free_list.push(HeapId(index as u32));
                self.live -= 1;
                collected += 1;
            }
        }
        collected
    }

    /// Writes a heap dump for the unhandled-exception report.
    #[must_use]
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(object) = slot {
                let _ = writeln!(
                    out,
                    "#{index}\ttemp={} const={}\t{}",
                    u8::from(object.temporary),
                    u8::from(object.constant),
                    self.object_to_string(HeapId(index as u32)),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_reuse_slots() {
        let mut heap = Heap::new();
        let a = heap.allocate_value(Value::Int(1), false, false);
        let b = heap.allocate_value(Value::Int(2), false, false);
        assert_eq!(heap.num_objects(), 2);

        heap.free(a);
        assert_eq!(heap.num_objects(), 1);

        // the freed slot is recycled
        let c = heap.allocate_value(Value::Int(3), false, false);
        assert_eq!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_mark_sweep_frees_unreachable() {
        let mut heap = Heap::new();
        let root = heap.allocate_value(Value::Int(1), false, false);
        let _garbage = heap.allocate_value(Value::Int(2), false, false);

        heap.mark_from_roots([root].into_iter());
        let collected = heap.sweep();

        assert_eq!(collected, 1);
        assert_eq!(heap.num_objects(), 1);
        assert!(matches!(heap.get(root).kind, ObjectKind::Variable(Value::Int(1))));
    }

    #[test]
    fn test_mark_follows_fields() {
        let mut heap = Heap::new();
        let field = heap.allocate_value(Value::Int(9), false, false);
        let parent = heap.allocate_value(Value::Structure, false, false);
        heap.get_mut(parent).add_field("x", field).unwrap();

        heap.mark_from_roots([parent].into_iter());
        assert_eq!(heap.sweep(), 0);
        assert_eq!(heap.num_objects(), 2);
    }

    #[test]
    fn test_mark_handles_cycles() {
        let mut heap = Heap::new();
        let a = heap.allocate_value(Value::Structure, false, false);
        let b = heap.allocate_value(Value::Structure, false, false);
        heap.get_mut(a).add_field("peer", b).unwrap();
        heap.get_mut(b).add_field("peer", a).unwrap();

        heap.mark_from_roots([a].into_iter());
        assert_eq!(heap.sweep(), 0);

        // unrooted cycle collects entirely
        heap.mark_from_roots(std::iter::empty());
        assert_eq!(heap.sweep(), 2);
        assert_eq!(heap.num_objects(), 0);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut heap = Heap::new();
        let field = heap.allocate_value(Value::Int(5), false, false);
        let parent = heap.allocate_value(Value::Structure, true, true);
        heap.get_mut(parent).add_field("x", field).unwrap();

        let clone = heap.clone_object(parent);
        assert_ne!(clone, parent);
        // flags reset on clones
        assert!(!heap.get(clone).temporary);
        assert!(!heap.get(clone).constant);

        let cloned_field = heap.get(clone).field_by_name("x").unwrap();
        assert_ne!(cloned_field, field);

        // mutating the clone's field leaves the original alone
        *heap.get_mut(cloned_field).value_mut().unwrap() = Value::Int(6);
        assert!(matches!(heap.get(field).kind, ObjectKind::Variable(Value::Int(5))));
    }

    #[test]
    fn test_structure_rendering() {
        let mut heap = Heap::new();
        let x = heap.allocate_value(Value::Int(1), false, false);
        let y = heap.allocate_value(Value::Str("two".to_owned()), false, false);
        let s = heap.allocate_value(Value::Structure, false, false);
        heap.get_mut(s).add_field("x", x).unwrap();
        heap.get_mut(s).add_field("y", y).unwrap();

        assert_eq!(heap.object_to_string(s), "{\"x\"=1, \"y\"=two}");
    }
}
