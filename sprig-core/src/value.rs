//! 定义中的值：字面量、Bean 引用以及可合并的集合
//!
//! [`BeanValue`] 是定义里声明的"值或引用"，[`ResolvedValue`] 是交给构造策略的
//! 解析结果（引用已经被替换成实例）。

use std::any::Any;
use std::sync::Arc;

use crate::bean::BeanInstance;

/// 定义中声明的值
#[derive(Debug, Clone, PartialEq)]
pub enum BeanValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// 对另一个 Bean 的运行时引用（按名称）
    Ref(String),
    List(Vec<BeanValue>),
    /// 保持首次出现顺序的集合，合并时去重
    Set(Vec<BeanValue>),
    /// 保持插入顺序的映射
    Map(Vec<(String, BeanValue)>),
}

impl BeanValue {
    /// 创建 Bean 引用
    pub fn reference(name: impl Into<String>) -> Self {
        BeanValue::Ref(name.into())
    }

    /// 是否为 Bean 引用
    pub fn is_reference(&self) -> bool {
        matches!(self, BeanValue::Ref(_))
    }

    /// 收集值（含嵌套集合）中出现的所有 Bean 引用名称
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            BeanValue::Ref(name) => names.push(name.as_str()),
            BeanValue::List(items) | BeanValue::Set(items) => {
                items.iter().for_each(|item| item.collect_references(names))
            }
            BeanValue::Map(entries) => entries
                .iter()
                .for_each(|(_, value)| value.collect_references(names)),
            _ => {}
        }
    }

    /// 用父定义中的同名值合并当前（子定义）值
    ///
    /// 两边是同一种集合时逐元素合并：
    /// - List：父元素在前，子元素追加
    /// - Set：父元素在前，子元素中未出现过的追加
    /// - Map：父条目在前，子条目按键覆盖，新键追加
    ///
    /// 其他情况子值直接胜出。
    pub fn merge_with_parent(&self, parent: &BeanValue) -> BeanValue {
        match (parent, self) {
            (BeanValue::List(parent_items), BeanValue::List(child_items)) => {
                let mut merged = parent_items.clone();
                merged.extend(child_items.iter().cloned());
                BeanValue::List(merged)
            }
            (BeanValue::Set(parent_items), BeanValue::Set(child_items)) => {
                let mut merged: Vec<BeanValue> = Vec::with_capacity(parent_items.len() + child_items.len());
                for item in parent_items.iter().chain(child_items.iter()) {
                    if !merged.contains(item) {
                        merged.push(item.clone());
                    }
                }
                BeanValue::Set(merged)
            }
            (BeanValue::Map(parent_entries), BeanValue::Map(child_entries)) => {
                let mut merged = parent_entries.clone();
                for (key, value) in child_entries {
                    match merged.iter_mut().find(|(existing, _)| existing == key) {
                        Some(slot) => slot.1 = value.clone(),
                        None => merged.push((key.clone(), value.clone())),
                    }
                }
                BeanValue::Map(merged)
            }
            _ => self.clone(),
        }
    }
}

impl From<&str> for BeanValue {
    fn from(value: &str) -> Self {
        BeanValue::String(value.to_string())
    }
}

impl From<String> for BeanValue {
    fn from(value: String) -> Self {
        BeanValue::String(value)
    }
}

impl From<i64> for BeanValue {
    fn from(value: i64) -> Self {
        BeanValue::Int(value)
    }
}

impl From<f64> for BeanValue {
    fn from(value: f64) -> Self {
        BeanValue::Float(value)
    }
}

impl From<bool> for BeanValue {
    fn from(value: bool) -> Self {
        BeanValue::Bool(value)
    }
}

/// 单个属性赋值
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub name: String,
    pub value: BeanValue,
}

/// 有序的属性赋值集合
///
/// 按插入顺序保存；对已有属性再次赋值会在原位置替换
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyValues {
    values: Vec<PropertyValue>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或替换属性
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<BeanValue>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|pv| pv.name == name) {
            Some(existing) => existing.value = value,
            None => self.values.push(PropertyValue { name, value }),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&BeanValue> {
        self.values.iter().find(|pv| pv.name == name).map(|pv| &pv.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<BeanValue> {
        let idx = self.values.iter().position(|pv| pv.name == name)?;
        Some(self.values.remove(idx).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 以父属性为基础合并子属性（当前值为子）
    ///
    /// 结果顺序：父属性按原顺序（被覆盖的保持原位置），然后是子独有的属性
    pub fn merged_over(&self, parent: &PropertyValues) -> PropertyValues {
        let mut merged = parent.clone();
        for pv in &self.values {
            let value = match parent.get(&pv.name) {
                Some(parent_value) => pv.value.merge_with_parent(parent_value),
                None => pv.value.clone(),
            };
            merged.add(pv.name.clone(), value);
        }
        merged
    }
}

impl<N: Into<String>, V: Into<BeanValue>> FromIterator<(N, V)> for PropertyValues {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut values = PropertyValues::new();
        for (name, value) in iter {
            values.add(name, value);
        }
        values
    }
}

/// 按索引合并构造参数：子参数覆盖同位置的父参数，父参数多出的部分保留
pub fn merge_constructor_args(child: &[BeanValue], parent: &[BeanValue]) -> Vec<BeanValue> {
    let len = child.len().max(parent.len());
    (0..len)
        .map(|idx| match (child.get(idx), parent.get(idx)) {
            (Some(c), Some(p)) => c.merge_with_parent(p),
            (Some(c), None) => c.clone(),
            (None, Some(p)) => p.clone(),
            (None, None) => unreachable!("index is below the longer length"),
        })
        .collect()
}

/// 解析后的值，交给构造策略使用
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bean(BeanInstance),
    List(Vec<ResolvedValue>),
    Map(Vec<(String, ResolvedValue)>),
}

impl ResolvedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResolvedValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResolvedValue::Int(i) => Some(*i),
            ResolvedValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResolvedValue::Float(f) => Some(*f),
            ResolvedValue::Int(i) => Some(*i as f64),
            ResolvedValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResolvedValue::Bool(b) => Some(*b),
            ResolvedValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ResolvedValue]> {
        match self {
            ResolvedValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, ResolvedValue)]> {
        match self {
            ResolvedValue::Map(entries) => Some(entries.as_slice()),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&BeanInstance> {
        match self {
            ResolvedValue::Bean(instance) => Some(instance),
            _ => None,
        }
    }

    /// 将 Bean 引用向下转型为具体类型
    pub fn as_bean<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.as_instance().and_then(|instance| instance.downcast::<T>())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResolvedValue::Null)
    }
}
