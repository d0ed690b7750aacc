//! 章节树: 由扁平的 "A / A.1" 路径构建的节点数组
//!
//! 节点按创建顺序编号, 父节点编号总是小于子节点, 汇总时倒序遍历一次即可自底向上累加。

use crate::models::{EstimateRow, LineResult, NodeTotals};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub type NodeId = usize;

/// 根节点编号
pub const ROOT: NodeId = 0;

/// 输入: 一个章节路径及其下的行
#[derive(Debug, Clone)]
pub struct SectionInput {
    pub path: String,
    pub rows: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: String,
    /// 规范化后的完整路径, 根节点为空串
    pub path: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// 直接归属本节点的行
    pub rows: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionTree {
    nodes: Vec<TreeNode>,
    #[serde(skip)]
    child_index: Vec<IndexMap<String, NodeId>>,
}

/// 拆分路径: 按 "/" 切分, 去空白, 丢弃空段
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl SectionTree {
    fn with_root() -> Self {
        Self {
            nodes: vec![TreeNode {
                id: ROOT,
                name: String::new(),
                path: String::new(),
                parent: None,
                children: Vec::new(),
                rows: Vec::new(),
            }],
            child_index: vec![IndexMap::new()],
        }
    }

    /// 一次遍历建树, 同名子节点复用, 子节点按首次出现排序
    pub fn build(sections: &[SectionInput]) -> Self {
        let mut tree = Self::with_root();
        for section in sections {
            let node = tree.ensure_path(&section.path);
            tree.nodes[node].rows.extend(section.rows.iter().copied());
        }
        tree
    }

    /// 按行的章节路径分组后建树, 分组顺序为首次出现顺序
    pub fn from_rows(rows: &[EstimateRow]) -> Self {
        let mut grouped: IndexMap<String, Vec<i64>> = IndexMap::new();
        for row in rows {
            let path = row.section_path.clone().unwrap_or_default();
            grouped.entry(path).or_default().push(row.row_index);
        }
        let sections: Vec<SectionInput> = grouped
            .into_iter()
            .map(|(path, rows)| SectionInput { path, rows })
            .collect();
        Self::build(&sections)
    }

    fn ensure_path(&mut self, path: &str) -> NodeId {
        let mut current = ROOT;
        for segment in split_path(path) {
            current = match self.child_index[current].get(segment) {
                Some(&id) => id,
                None => self.push_child(current, segment),
            };
        }
        current
    }

    fn push_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.nodes.len();
        let path = if self.nodes[parent].path.is_empty() {
            name.to_string()
        } else {
            format!("{} / {}", self.nodes[parent].path, name)
        };
        self.nodes.push(TreeNode {
            id,
            name: name.to_string(),
            path,
            parent: Some(parent),
            children: Vec::new(),
            rows: Vec::new(),
        });
        self.child_index.push(IndexMap::new());
        self.nodes[parent].children.push(id);
        self.child_index[parent].insert(name.to_string(), id);
        id
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// 节点数, 含根节点
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 按规范化路径查找节点
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = ROOT;
        for segment in split_path(path) {
            current = *self.child_index[current].get(segment)?;
        }
        Some(current)
    }

    /// 自底向上汇总
    ///
    /// 行只加到直接父节点, 之后每个节点把自己的合计加给父节点一次。
    /// `visible` 为 None 表示全部可见; 没有计价结果的行不计入。
    pub fn aggregate(
        &self,
        results: &HashMap<i64, LineResult>,
        visible: Option<&HashSet<i64>>,
    ) -> TreeTotals {
        let mut totals = vec![NodeTotals::zero(); self.nodes.len()];

        for node in &self.nodes {
            for row in &node.rows {
                if visible.is_some_and(|v| !v.contains(row)) {
                    continue;
                }
                if let Some(line) = results.get(row) {
                    totals[node.id].add_line(line);
                }
            }
        }

        for id in (1..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[id].parent {
                let child = totals[id].clone();
                totals[parent].absorb(&child);
            }
        }

        TreeTotals { totals }
    }
}

/// 各节点汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct TreeTotals {
    totals: Vec<NodeTotals>,
}

impl TreeTotals {
    /// 无贡献行的节点返回 None
    pub fn get(&self, id: NodeId) -> Option<&NodeTotals> {
        self.totals.get(id).filter(|t| t.has_badge())
    }

    pub fn root(&self) -> &NodeTotals {
        &self.totals[ROOT]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeTotals)> {
        self.totals.iter().enumerate().filter(|(_, t)| t.has_badge())
    }
}
