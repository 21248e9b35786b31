//! Caller-supplied joint hierarchy.
//!
//! A [`JointHierarchy`] is validated once, on construction or deserialization, and is
//! immutable afterwards. Compilers only ever read from it.

use glam::Vec3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;
use crate::ids::{IdAllocator, JointId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub id: JointId,
    pub name: String,
    /// World-space position captured at bind time.
    pub position: Vec3,
    #[serde(default)]
    pub parent: Option<JointId>,
    #[serde(default)]
    pub children: Vec<JointId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawHierarchy {
    joints: Vec<JointSpec>,
}

/// Validated joint tree (or forest). Every joint appears once, parents exist, child lists
/// agree with parent links and there are no cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHierarchy", into = "RawHierarchy")]
pub struct JointHierarchy {
    joints: Vec<JointSpec>,
    index: HashMap<JointId, usize>,
}

impl TryFrom<RawHierarchy> for JointHierarchy {
    type Error = StructuralError;

    fn try_from(raw: RawHierarchy) -> Result<Self, Self::Error> {
        JointHierarchy::from_joints(raw.joints)
    }
}

impl From<JointHierarchy> for RawHierarchy {
    fn from(h: JointHierarchy) -> Self {
        RawHierarchy { joints: h.joints }
    }
}

impl JointHierarchy {
    pub fn from_joints(joints: Vec<JointSpec>) -> Result<Self, StructuralError> {
        if joints.is_empty() {
            return Err(StructuralError::EmptyHierarchy);
        }
        let mut index = HashMap::with_capacity(joints.len());
        for (i, joint) in joints.iter().enumerate() {
            if index.insert(joint.id, i).is_some() {
                return Err(StructuralError::DuplicateJoint(joint.id));
            }
        }

        for joint in &joints {
            if let Some(parent) = joint.parent {
                let p = index.get(&parent).ok_or(StructuralError::MissingParent {
                    joint: joint.id,
                    parent,
                })?;
                if !joints[*p].children.contains(&joint.id) {
                    return Err(StructuralError::InconsistentChildren {
                        parent,
                        child: joint.id,
                    });
                }
            }
            for child in &joint.children {
                let c = index
                    .get(child)
                    .ok_or(StructuralError::UnknownJoint(*child))?;
                if joints[*c].parent != Some(joint.id) {
                    return Err(StructuralError::InconsistentChildren {
                        parent: joint.id,
                        child: *child,
                    });
                }
            }
        }

        // A parent walk longer than the joint count can only mean a loop.
        for joint in &joints {
            let mut cursor = joint.parent;
            let mut steps = 0;
            while let Some(id) = cursor {
                steps += 1;
                if steps > joints.len() {
                    return Err(StructuralError::CyclicHierarchy(joint.id));
                }
                cursor = joints[index[&id]].parent;
            }
        }

        Ok(JointHierarchy { joints, index })
    }

    /// Linear chain, each joint parented to the previous one.
    pub fn from_chain<S: AsRef<str>>(chain: &[(S, Vec3)]) -> Result<Self, StructuralError> {
        let mut builder = JointHierarchyBuilder::new();
        let mut parent = None;
        for (name, position) in chain {
            parent = Some(builder.add(name.as_ref(), *position, parent)?);
        }
        builder.build()
    }

    pub fn get(&self, id: JointId) -> Result<&JointSpec, StructuralError> {
        self.index
            .get(&id)
            .map(|i| &self.joints[*i])
            .ok_or(StructuralError::UnknownJoint(id))
    }

    pub fn find(&self, name: &str) -> Option<&JointSpec> {
        self.joints.iter().find(|j| j.name == name)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JointSpec> {
        self.joints.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &JointSpec> {
        self.joints.iter().filter(|j| j.parent.is_none())
    }

    /// Walk from `root` following the first child at each level.
    pub fn chain_from(&self, root: JointId) -> Result<Vec<JointId>, StructuralError> {
        let mut out = vec![root];
        let mut current = self.get(root)?;
        while let Some(next) = current.children.first() {
            out.push(*next);
            current = self.get(*next)?;
        }
        Ok(out)
    }

    /// `root` and all of its descendants in depth-first pre-order.
    pub fn descendants(&self, root: JointId) -> Result<Vec<JointId>, StructuralError> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let joint = self.get(id)?;
            out.push(id);
            stack.extend(joint.children.iter().rev().copied());
        }
        Ok(out)
    }

    pub fn positions(&self, ids: &[JointId]) -> Result<Vec<Vec3>, StructuralError> {
        ids.iter().map(|id| self.get(*id).map(|j| j.position)).collect()
    }
}

/// Incremental construction of a [`JointHierarchy`] with automatic child bookkeeping.
#[derive(Debug, Default)]
pub struct JointHierarchyBuilder {
    ids: IdAllocator,
    joints: Vec<JointSpec>,
}

impl JointHierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: &str,
        position: Vec3,
        parent: Option<JointId>,
    ) -> Result<JointId, StructuralError> {
        let id = self.ids.alloc_joint();
        if let Some(p) = parent {
            let parent_spec = self
                .joints
                .iter_mut()
                .find(|j| j.id == p)
                .ok_or(StructuralError::MissingParent { joint: id, parent: p })?;
            parent_spec.children.push(id);
        }
        self.joints.push(JointSpec {
            id,
            name: name.to_string(),
            position,
            parent,
            children: Vec::new(),
        });
        Ok(id)
    }

    pub fn build(self) -> Result<JointHierarchy, StructuralError> {
        JointHierarchy::from_joints(self.joints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm() -> JointHierarchy {
        JointHierarchy::from_chain(&[
            ("shoulder_bnd", Vec3::ZERO),
            ("elbow_bnd", Vec3::new(1.0, 0.0, -0.2)),
            ("wrist_bnd", Vec3::new(2.0, 0.0, 0.0)),
        ])
        .expect("valid chain")
    }

    #[test]
    fn chain_follows_first_child() {
        let h = arm();
        let root = h.roots().next().unwrap().id;
        let chain = h.chain_from(root).unwrap();
        assert_eq!(chain, vec![JointId(0), JointId(1), JointId(2)]);
        assert_eq!(h.descendants(JointId(1)).unwrap(), vec![JointId(1), JointId(2)]);
    }

    #[test]
    fn rejects_empty_and_missing_parent() {
        assert_eq!(
            JointHierarchy::from_joints(vec![]).unwrap_err(),
            StructuralError::EmptyHierarchy
        );
        let orphan = JointSpec {
            id: JointId(0),
            name: "a".into(),
            position: Vec3::ZERO,
            parent: Some(JointId(7)),
            children: vec![],
        };
        assert_eq!(
            JointHierarchy::from_joints(vec![orphan]).unwrap_err(),
            StructuralError::MissingParent {
                joint: JointId(0),
                parent: JointId(7)
            }
        );
    }

    #[test]
    fn rejects_cycles() {
        let a = JointSpec {
            id: JointId(0),
            name: "a".into(),
            position: Vec3::ZERO,
            parent: Some(JointId(1)),
            children: vec![JointId(1)],
        };
        let b = JointSpec {
            id: JointId(1),
            name: "b".into(),
            position: Vec3::X,
            parent: Some(JointId(0)),
            children: vec![JointId(0)],
        };
        assert!(matches!(
            JointHierarchy::from_joints(vec![a, b]),
            Err(StructuralError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn deserialization_validates() {
        let bad = r#"{ "joints": [ { "id": 0, "name": "a", "position": [0, 0, 0], "children": [3] } ] }"#;
        let err = serde_json::from_str::<JointHierarchy>(bad).unwrap_err();
        assert!(err.to_string().contains("not part of the hierarchy"));

        let good = serde_json::to_string(&arm()).unwrap();
        let back: JointHierarchy = serde_json::from_str(&good).unwrap();
        assert_eq!(back, arm());
    }
}
