// File: src/gc.rs
//
// Tri-colour mark-sweep garbage collector over a single object arena.
// White = unreached, grey = reached but not yet scanned (on the grey
// worklist), black = scanned. There is no reference-counting anywhere in
// the VM: every heap object is reachable only by walking from roots the
// compiler and VM hand in explicitly, which is what makes closure cycles
// (mutual recursion through captured upvalues) collectible at all.
//
// Object handles are arena indices rather than raw pointers, so this
// collector needs no unsafe code: moving or freeing an object never
// invalidates a `Value` held elsewhere; a stale handle is a logic bug
// caught by an `expect`, not a memory-safety hazard.

use crate::object::{fnv1a, ObjData, ObjHandle, ObjString, ObjUpvalue};
use crate::value::Value;

const GC_GROWTH_FACTOR: usize = 2;
const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;

struct Slot {
    marked: bool,
    data: ObjData,
}

/// Open-addressed set of interned strings, keyed by content hash. A weak
/// set: the mark phase never traverses it as a root, and entries whose
/// string has gone white are pruned between mark and sweep.
#[derive(Default)]
struct InternTable {
    entries: Vec<Option<(u32, ObjHandle)>>,
    count: usize,
}

impl InternTable {
    fn find(&self, hash: u32) -> Option<ObjHandle> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match &self.entries[index] {
                None => return None,
                Some((h, handle)) if *h == hash => return Some(*handle),
                _ => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn insert(&mut self, hash: u32, handle: ObjHandle) {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.entries.len() as f64 * 0.75 {
            self.grow();
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        while self.entries[index].is_some() {
            index = (index + 1) & (capacity - 1);
        }
        self.entries[index] = Some((hash, handle));
        self.count += 1;
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let old = std::mem::replace(&mut self.entries, vec![None; new_capacity]);
        self.count = 0;
        for (hash, handle) in old.into_iter().flatten() {
            let capacity = self.entries.len();
            let mut index = (hash as usize) & (capacity - 1);
            while self.entries[index].is_some() {
                index = (index + 1) & (capacity - 1);
            }
            self.entries[index] = Some((hash, handle));
            self.count += 1;
        }
    }

    /// Removes every entry whose backing object did not survive marking.
    fn retain_marked(&mut self, is_marked: impl Fn(ObjHandle) -> bool) {
        for slot in self.entries.iter_mut() {
            if let Some((_, handle)) = slot {
                if !is_marked(*handle) {
                    *slot = None;
                }
            }
        }
    }
}

pub struct Heap {
    objects: Vec<Option<Slot>>,
    free_slots: Vec<ObjHandle>,
    strings: InternTable,
    grey_stack: Vec<ObjHandle>,
    bytes_allocated: usize,
    next_gc: usize,
    stress: bool,
    /// The interned `"init"` string, always a GC root (spec §4.4).
    pub init_string: ObjHandle,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Self {
            objects: Vec::new(),
            free_slots: Vec::new(),
            strings: InternTable::default(),
            grey_stack: Vec::new(),
            bytes_allocated: 0,
            next_gc: GC_INITIAL_THRESHOLD,
            stress: std::env::var("TOK_GC_STRESS").is_ok(),
            init_string: 0,
        };
        heap.init_string = heap.intern("init");
        heap
    }

    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    fn approx_size(data: &ObjData) -> usize {
        std::mem::size_of::<ObjData>()
            + match data {
                ObjData::String(s) => s.chars.len(),
                ObjData::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * 16,
                ObjData::Closure(c) => c.upvalues.len() * 8,
                _ => 0,
            }
    }

    /// Allocates a new object, returning its handle. Does not itself
    /// trigger collection; callers check `should_collect` and gather
    /// their own roots before calling `collect`, because only the
    /// caller (compiler or VM) knows what is currently reachable.
    pub fn alloc(&mut self, data: ObjData) -> ObjHandle {
        self.bytes_allocated += Self::approx_size(&data);
        let slot = Slot { marked: false, data };
        if let Some(handle) = self.free_slots.pop() {
            self.objects[handle as usize] = Some(slot);
            handle
        } else {
            self.objects.push(Some(slot));
            (self.objects.len() - 1) as u32
        }
    }

    pub fn get(&self, handle: ObjHandle) -> &ObjData {
        &self.objects[handle as usize].as_ref().expect("dangling object handle").data
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut ObjData {
        &mut self.objects[handle as usize].as_mut().expect("dangling object handle").data
    }

    /// Interns a string by content, allocating a new `ObjString` only on
    /// first sight. Identity of the returned handle is content equality.
    pub fn intern(&mut self, s: &str) -> ObjHandle {
        let hash = fnv1a(s);
        if let Some(existing) = self.strings.find(hash) {
            return existing;
        }
        let handle = self.alloc(ObjData::String(ObjString::new(s)));
        self.strings.insert(hash, handle);
        handle
    }

    pub fn as_string(&self, handle: ObjHandle) -> &str {
        match self.get(handle) {
            ObjData::String(s) => &s.chars,
            other => panic!("expected string object, found {}", other.type_name()),
        }
    }

    pub fn hash_of(&self, handle: ObjHandle) -> u32 {
        match self.get(handle) {
            ObjData::String(s) => s.hash,
            other => panic!("expected string object, found {}", other.type_name()),
        }
    }

    pub fn print_object(&self, handle: ObjHandle) -> String {
        match self.get(handle) {
            ObjData::String(s) => s.chars.to_string(),
            ObjData::Function(f) => match f.name {
                Some(n) => format!("<fn {}>", self.as_string(n)),
                None => "<script>".to_string(),
            },
            ObjData::Closure(c) => self.print_object(c.function),
            ObjData::Upvalue(_) => "upvalue".to_string(),
            ObjData::Class(c) => self.as_string(c.name).to_string(),
            ObjData::Instance(i) => format!("{} instance", self.print_object(i.class)),
            ObjData::BoundMethod(b) => self.print_object(b.method),
            ObjData::Native(n) => format!("<native fn {}>", self.as_string(n.name)),
        }
    }

    // --- Marking ---------------------------------------------------

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    pub fn mark_object(&mut self, handle: ObjHandle) {
        let already_marked = match &self.objects[handle as usize] {
            Some(slot) => slot.marked,
            None => return,
        };
        if already_marked {
            return;
        }
        self.objects[handle as usize].as_mut().unwrap().marked = true;
        self.grey_stack.push(handle);
    }

    fn trace_references(&mut self) {
        while let Some(handle) = self.grey_stack.pop() {
            self.blacken(handle);
        }
    }

    /// Marks every object and value directly referenced by `handle`.
    /// Structure is cloned out first since we can't hold a borrow of
    /// `self.objects` while recursively marking through `self`.
    fn blacken(&mut self, handle: ObjHandle) {
        match self.get(handle) {
            ObjData::String(_) | ObjData::Native(_) => {}
            ObjData::Function(f) => {
                let name = f.name;
                let constants: Vec<Value> = f.chunk.constants.clone();
                if let Some(n) = name {
                    self.mark_object(n);
                }
                for c in constants {
                    self.mark_value(c);
                }
            }
            ObjData::Closure(c) => {
                let function = c.function;
                let upvalues = c.upvalues.clone();
                self.mark_object(function);
                for u in upvalues {
                    self.mark_object(u);
                }
            }
            ObjData::Upvalue(u) => {
                if let ObjUpvalue::Closed(v) = u {
                    let v = *v;
                    self.mark_value(v);
                }
            }
            ObjData::Class(c) => {
                let name = c.name;
                let entries: Vec<(ObjHandle, Value)> = c.methods.iter().map(|(k, v)| (k, *v)).collect();
                self.mark_object(name);
                for (k, v) in entries {
                    self.mark_object(k);
                    self.mark_value(v);
                }
            }
            ObjData::Instance(i) => {
                let class = i.class;
                let entries: Vec<(ObjHandle, Value)> = i.fields.iter().map(|(k, v)| (k, *v)).collect();
                self.mark_object(class);
                for (k, v) in entries {
                    self.mark_object(k);
                    self.mark_value(v);
                }
            }
            ObjData::BoundMethod(b) => {
                let receiver = b.receiver;
                let method = b.method;
                self.mark_value(receiver);
                self.mark_object(method);
            }
        }
    }

    // --- Collection --------------------------------------------------

    /// Marks the given roots, traces until the grey worklist is empty,
    /// prunes the (weak) intern table, sweeps, and regrows the
    /// next-collection threshold. Callers supply their own roots because
    /// the heap has no notion of "the VM" or "the compiler".
    pub fn collect(&mut self, object_roots: &[ObjHandle], value_roots: &[Value]) {
        self.mark_object(self.init_string);
        for &h in object_roots {
            self.mark_object(h);
        }
        for &v in value_roots {
            self.mark_value(v);
        }
        self.trace_references();

        let objects = &self.objects;
        self.strings
            .retain_marked(|h| matches!(objects.get(h as usize), Some(Some(slot)) if slot.marked));

        self.sweep();

        self.next_gc = self.bytes_allocated * GC_GROWTH_FACTOR;
    }

    fn sweep(&mut self) {
        for (index, slot) in self.objects.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => s.marked = false,
                Some(s) => {
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(Self::approx_size(&s.data));
                    *slot = None;
                    self.free_slots.push(index as u32);
                }
                None => {}
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
