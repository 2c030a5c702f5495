//! Heap storage for Lox objects.
//!
//! There is no garbage *collection* here, only garbage. Every object lives
//! in one arena ([Heap]) for as long as the VM does, and the whole lot is
//! freed in bulk when the heap is dropped. Values refer to objects with small
//! `Copy` handles instead of pointers.
//!
//! The heap also owns the string-intern table: there is at most one live
//! string object per distinct content, which is what lets [StrRef] handles
//! compare by identity everywhere else.

use crate::table::{Table, TableKey};
use crate::value::Value;

/// Owns every runtime object. Dropping the heap frees all of them at once.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Obj>,
    /// The intern set: every live string is a key here (the value is nil;
    /// only key presence matters).
    strings: Table<StrRef>,
}

/// A heap-allocated runtime object. Strings are the only variant so far.
#[derive(Debug)]
pub enum Obj {
    String(ObjString),
}

/// An immutable string object: its contents and its precomputed hash.
#[derive(Debug)]
pub struct ObjString {
    chars: Box<str>,
    hash: u32,
}

/// A handle to a string object in a [Heap].
///
/// The handle carries the string's hash so that table probing never needs to
/// chase the heap. Two handles are equal exactly when they name the same
/// object; interning guarantees that implies (and is implied by) equal
/// content.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StrRef {
    index: u32,
    hash: u32,
}

impl TableKey for StrRef {
    fn key_hash(&self) -> u32 {
        self.hash
    }
}

///////////////////////////////////////// Implementation //////////////////////////////////////////

impl Heap {
    /// Returns a new, empty heap.
    pub fn new() -> Self {
        Heap::default()
    }

    /// Interns a string, copying the contents.
    ///
    /// If an identical string already lives on the heap, its handle is
    /// returned and nothing is allocated.
    pub fn intern_copy(&mut self, chars: &str) -> StrRef {
        let hash = hash_string(chars);
        if let Some(existing) = self.find_interned(chars, hash) {
            return existing;
        }

        self.allocate_string(chars.into(), hash)
    }

    /// Interns a string, taking ownership of an already-built buffer.
    ///
    /// Used when the buffer was just computed (by concatenation, say) and a
    /// copy would be redundant. On an intern hit the buffer is dropped and
    /// the existing handle returned.
    pub fn intern_take(&mut self, chars: String) -> StrRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self.find_interned(&chars, hash) {
            return existing;
        }

        self.allocate_string(chars.into_boxed_str(), hash)
    }

    /// Resolves a handle to the string contents.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this heap.
    pub fn get_str(&self, handle: StrRef) -> &str {
        let Obj::String(string) = &self.objects[handle.index as usize];
        &string.chars
    }

    /// Returns how many objects are currently stored.
    pub fn n_objects(&self) -> usize {
        self.objects.len()
    }

    /// Probes the intern set by raw content, before any object exists for it.
    fn find_interned(&self, chars: &str, hash: u32) -> Option<StrRef> {
        self.strings.find_key(hash, |candidate| {
            let Obj::String(existing) = &self.objects[candidate.index as usize];
            existing.hash == hash
                && existing.chars.len() == chars.len()
                && &*existing.chars == chars
        })
    }

    /// Stores a fresh string object and registers it in the intern set.
    /// The caller must already have checked for an intern hit.
    fn allocate_string(&mut self, chars: Box<str>, hash: u32) -> StrRef {
        let index =
            u32::try_from(self.objects.len()).expect("heap exceeded u32::MAX objects");
        self.objects.push(Obj::String(ObjString { chars, hash }));

        let handle = StrRef { index, hash };
        self.strings.set(handle, Value::Nil);
        handle
    }
}

/// Hashes a string with 32-bit FNV-1a: start from the offset basis and, for
/// each byte, XOR then multiply by the FNV prime.
pub fn hash_string(chars: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in chars.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////
