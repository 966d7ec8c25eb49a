use serde::{Deserialize, Serialize};

use crate::symbol::SymbolKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Removed,
    Added,
    Changed,
}

impl ChangeType {
    pub const ALL: [ChangeType; 3] = [ChangeType::Removed, ChangeType::Added, ChangeType::Changed];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Public,
    Private,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceLists {
    pub public: Vec<String>,
    pub private: Vec<String>,
}

impl SurfaceLists {
    pub fn get(&self, surface: Surface) -> &[String] {
        match surface {
            Surface::Public => &self.public,
            Surface::Private => &self.private,
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.public.iter().chain(&self.private).any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.public.len() + self.private.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisDelta {
    pub removed: SurfaceLists,
    pub added: SurfaceLists,
    pub changed: SurfaceLists,
}

impl AxisDelta {
    pub fn get(&self, change: ChangeType) -> &SurfaceLists {
        match change {
            ChangeType::Removed => &self.removed,
            ChangeType::Added => &self.added,
            ChangeType::Changed => &self.changed,
        }
    }

    fn get_mut(&mut self, change: ChangeType) -> &mut SurfaceLists {
        match change {
            ChangeType::Removed => &mut self.removed,
            ChangeType::Added => &mut self.added,
            ChangeType::Changed => &mut self.changed,
        }
    }
}

/// Per-symbol changes of one comparison, split by axis, change type and
/// surface. Within an axis a name lives in at most one change-type bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDelta {
    pub functions: AxisDelta,
    pub variables: AxisDelta,
}

impl SymbolDelta {
    pub fn axis(&self, kind: SymbolKind) -> &AxisDelta {
        match kind {
            SymbolKind::Function => &self.functions,
            SymbolKind::Variable => &self.variables,
        }
    }

    /// Records a name. Returns `false` (and changes nothing) if the name is
    /// already present in any bucket of that axis.
    pub fn record(
        &mut self,
        kind: SymbolKind,
        change: ChangeType,
        surface: Surface,
        name: impl Into<String>,
    ) -> bool {
        let name = name.into();
        let axis = match kind {
            SymbolKind::Function => &mut self.functions,
            SymbolKind::Variable => &mut self.variables,
        };
        if ChangeType::ALL.iter().any(|c| axis.get(*c).contains(&name)) {
            return false;
        }
        let lists = axis.get_mut(change);
        match surface {
            Surface::Public => lists.public.push(name),
            Surface::Private => lists.private.push(name),
        }
        true
    }

    /// Names of one change type and surface across both axes, functions first.
    pub fn names(&self, change: ChangeType, surface: Surface) -> Vec<&str> {
        SymbolKind::ALL
            .iter()
            .flat_map(|k| self.axis(*k).get(change).get(surface))
            .map(String::as_str)
            .collect()
    }

    pub fn public(&self, change: ChangeType) -> Vec<&str> {
        self.names(change, Surface::Public)
    }

    pub fn private(&self, change: ChangeType) -> Vec<&str> {
        self.names(change, Surface::Private)
    }

    pub fn is_empty(&self) -> bool {
        SymbolKind::ALL.iter().all(|k| {
            ChangeType::ALL
                .iter()
                .all(|c| self.axis(*k).get(*c).is_empty())
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisCounts {
    pub removed: u32,
    pub changed: u32,
    pub added: u32,
}

impl AxisCounts {
    pub fn get(&self, change: ChangeType) -> u32 {
        match change {
            ChangeType::Removed => self.removed,
            ChangeType::Added => self.added,
            ChangeType::Changed => self.changed,
        }
    }
}

/// Summary counters reported by the differ (or derived from symbol tables).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub functions: AxisCounts,
    pub variables: AxisCounts,
}

impl ChangeCounts {
    pub fn axis(&self, kind: SymbolKind) -> &AxisCounts {
        match kind {
            SymbolKind::Function => &self.functions,
            SymbolKind::Variable => &self.variables,
        }
    }

    pub fn total(&self, change: ChangeType) -> u32 {
        self.functions.get(change) + self.variables.get(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_name_lands_in_one_bucket_per_axis() {
        let mut d = SymbolDelta::default();
        assert!(d.record(SymbolKind::Function, ChangeType::Removed, Surface::Public, "foo"));
        assert!(!d.record(SymbolKind::Function, ChangeType::Changed, Surface::Public, "foo"));
        assert!(!d.record(SymbolKind::Function, ChangeType::Removed, Surface::Private, "foo"));
        // other axis is independent
        assert!(d.record(SymbolKind::Variable, ChangeType::Added, Surface::Public, "foo"));
        assert_eq!(d.public(ChangeType::Removed), vec!["foo"]);
        assert!(d.public(ChangeType::Changed).is_empty());
        assert_eq!(d.public(ChangeType::Added), vec!["foo"]);
    }

    #[test]
    fn names_list_functions_before_variables() {
        let mut d = SymbolDelta::default();
        d.record(SymbolKind::Variable, ChangeType::Added, Surface::Public, "var");
        d.record(SymbolKind::Function, ChangeType::Added, Surface::Public, "fn");
        d.record(SymbolKind::Function, ChangeType::Added, Surface::Private, "hidden");
        assert_eq!(d.public(ChangeType::Added), vec!["fn", "var"]);
        assert_eq!(d.private(ChangeType::Added), vec!["hidden"]);
        assert!(!d.is_empty());
        assert!(SymbolDelta::default().is_empty());
    }
}
