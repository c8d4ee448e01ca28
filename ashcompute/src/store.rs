//! GPUオブジェクトを格納する型付きのスロットアロケータ。
//!
//! `HandleStore<T>` にオブジェクトを格納すると `Handle<T>` が返される。
//! Handleはスロットのindexと世代番号、Store固有のidを持ち、
//! 解放済みのHandleや他のStoreのHandleでの参照は `Error::InvalidHandle` になる。
//! 解放されたスロットは世代番号を進めて再利用するため、
//! 古いHandleが新しいオブジェクトを指してしまうことはない。

use crate::{Error, Result};
use std::{
    fmt::Debug,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering},
};

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

/// `HandleStore<T>` に格納されたオブジェクトを指すHandle
pub struct Handle<T> {
    index: u32,
    generation: u32,
    store: u32,
    _marker: PhantomData<fn() -> T>,
}
impl<T> Handle<T> {
    /// スロットのindex
    pub fn index(&self) -> u32 {
        self.index
    }

    /// スロットの世代番号
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// TにCloneなどを要求しないように手で実装する
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.generation == other.generation
            && self.store == other.store
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
        self.store.hash(state);
    }
}
impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("store", &self.store)
            .finish()
    }
}

struct Slot<T> {
    generation: u32,
    // 作成順に振られる番号。破棄順を決めるのに使う
    sequence: u64,
    value: Option<T>,
}

/// 型付きのスロットアロケータ
pub struct HandleStore<T> {
    id: u32,
    kind: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    next_sequence: u64,
    len: usize,
}
impl<T> HandleStore<T> {
    /// `capacity` 個分の領域を確保したStoreを作成する。
    /// `kind` はエラーメッセージに使われるオブジェクトの種類名。
    pub fn with_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            next_sequence: 0,
            len: 0,
        }
    }

    /// オブジェクトを格納してHandleを返す
    pub fn insert(&mut self, value: T) -> Handle<T> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.sequence = sequence;
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
                store: self.id,
                _marker: PhantomData,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            sequence,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
            store: self.id,
            _marker: PhantomData,
        }
    }

    /// Handleの指すオブジェクトを取得する
    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        self.slot(handle)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(Error::InvalidHandle { kind: self.kind })
    }

    /// Handleの指すオブジェクトを可変参照で取得する
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let kind = self.kind;
        if !self.owns(handle) {
            return Err(Error::InvalidHandle { kind });
        }
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(Error::InvalidHandle { kind })
    }

    /// Handleの指すオブジェクトを取り出してスロットを解放する
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let kind = self.kind;
        if !self.owns(handle) {
            return Err(Error::InvalidHandle { kind });
        }
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(Error::InvalidHandle { kind })?;
        let value = slot.value.take().ok_or(Error::InvalidHandle { kind })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Ok(value)
    }

    /// Handleが有効かどうか
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 有効なHandleを作成順に列挙する
    pub fn handles(&self) -> Vec<Handle<T>> {
        let mut handles = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| {
                (
                    slot.sequence,
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                        store: self.id,
                        _marker: PhantomData,
                    },
                )
            })
            .collect::<Vec<_>>();
        handles.sort_by_key(|(sequence, _)| *sequence);
        handles.into_iter().map(|(_, handle)| handle).collect()
    }

    /// 条件に一致するオブジェクトを新しいものから順にすべて取り出す
    pub fn drain_newest_first_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut handles = self.handles();
        handles.reverse();
        let mut drained = Vec::new();
        for handle in handles {
            let matches = self.get(handle).map(&mut predicate).unwrap_or(false);
            if matches {
                if let Ok(value) = self.remove(handle) {
                    drained.push(value);
                }
            }
        }
        drained
    }

    /// すべてのオブジェクトを新しいものから順に取り出す
    pub fn drain_newest_first(&mut self) -> Vec<T> {
        self.drain_newest_first_where(|_| true)
    }

    fn owns(&self, handle: Handle<T>) -> bool {
        handle.store == self.id
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }
}

impl<T> Debug for HandleStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleStore")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("capacity", &self.slots.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut store = HandleStore::with_capacity("buffer", 4);
        let a = store.insert(10u32);
        let b = store.insert(20u32);
        assert_eq!(*store.get(a).unwrap(), 10);
        assert_eq!(*store.get(b).unwrap(), 20);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_after_remove_fails() {
        let mut store = HandleStore::with_capacity("fence", 1);
        let handle = store.insert("fence");
        assert_eq!(store.remove(handle).unwrap(), "fence");
        assert!(matches!(
            store.get(handle),
            Err(Error::InvalidHandle { kind: "fence" })
        ));
        assert!(store.remove(handle).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn reused_slot_rejects_stale_handle() {
        let mut store = HandleStore::with_capacity("shader", 1);
        let old = store.insert(1);
        store.remove(old).unwrap();
        let new = store.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(store.get(old).is_err());
        assert_eq!(*store.get(new).unwrap(), 2);
        assert!(store.get_mut(old).is_err());
    }

    #[test]
    fn handle_from_other_store_fails() {
        let mut first = HandleStore::with_capacity("pipeline", 1);
        let mut second = HandleStore::with_capacity("pipeline", 1);
        let handle = first.insert(1);
        second.insert(2);
        assert!(second.get(handle).is_err());
        assert!(second.remove(handle).is_err());
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn out_of_range_index_fails() {
        let mut big = HandleStore::with_capacity("image", 8);
        let handles = (0..8).map(|i| big.insert(i)).collect::<Vec<_>>();
        let mut small = HandleStore::<i32>::with_capacity("image", 1);
        let foreign = Handle {
            store: small.id,
            ..handles[7]
        };
        assert!(small.get(foreign).is_err());
        small.insert(0);
        assert!(small.get(foreign).is_err());
    }

    #[test]
    fn grows_past_capacity_hint() {
        let mut store = HandleStore::with_capacity("command buffer", 2);
        let handles = (0..100).map(|i| store.insert(i)).collect::<Vec<_>>();
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(*store.get(*handle).unwrap(), i);
        }
    }

    #[test]
    fn drains_newest_first() {
        let mut store = HandleStore::with_capacity("buffer", 4);
        let a = store.insert("a");
        store.insert("b");
        store.remove(a).unwrap();
        // スロット0を再利用するが作成順では最後
        store.insert("c");
        store.insert("d");
        assert_eq!(store.drain_newest_first(), vec!["d", "c", "b"]);
        assert!(store.is_empty());
    }

    #[test]
    fn drain_where_keeps_unmatched() {
        let mut store = HandleStore::with_capacity("buffer", 4);
        let keep = store.insert(1);
        store.insert(2);
        store.insert(4);
        assert_eq!(store.drain_newest_first_where(|v| v % 2 == 0), vec![4, 2]);
        assert_eq!(store.handles(), vec![keep]);
    }
}
