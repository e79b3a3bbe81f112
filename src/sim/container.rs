//! A container with no pixels: keeps node placement and counts operations.

use std::collections::BTreeMap;

use crate::layout::{GridContainer, ItemRect};

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessNode {
    pub item_id: String,
    pub rect: ItemRect,
}

#[derive(Debug, Default)]
pub struct HeadlessContainer {
    nodes: BTreeMap<usize, HeadlessNode>,
    content_height: f32,
    inserts: u64,
    removes: u64,
    repositions: u64,
}

impl HeadlessContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&HeadlessNode> {
        self.nodes.get(&index)
    }

    pub fn content_height(&self) -> f32 {
        self.content_height
    }

    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    pub fn removes(&self) -> u64 {
        self.removes
    }

    pub fn repositions(&self) -> u64 {
        self.repositions
    }
}

impl GridContainer for HeadlessContainer {
    /// The item id.
    type Node = String;

    fn insert(&mut self, index: usize, node: String, rect: ItemRect) {
        self.inserts += 1;
        self.nodes.insert(
            index,
            HeadlessNode {
                item_id: node,
                rect,
            },
        );
    }

    fn reposition(&mut self, index: usize, rect: ItemRect) {
        if let Some(node) = self.nodes.get_mut(&index) {
            node.rect = rect;
            self.repositions += 1;
        }
    }

    fn remove(&mut self, index: usize) {
        if self.nodes.remove(&index).is_some() {
            self.removes += 1;
        }
    }

    fn set_content_height(&mut self, height: f32) {
        self.content_height = height;
    }
}
