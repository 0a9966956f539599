#![forbid(unsafe_code)]

//! `x-alias="c::value ..."`: publish the element into controller values.
//!
//! References resolve against the parent scope, so an element aliases
//! itself into an enclosing controller, never into one it binds itself.
//!
//! What publishing means depends on the value the controller provided:
//!
//! | current value  | connect                   | disconnect                          |
//! |----------------|---------------------------|-------------------------------------|
//! | `Elements`     | append, notify            | remove, notify                      |
//! | `Undefined`    | set to the element        | n/a                                 |
//! | held by `self` | n/a                       | next waiter takes over, or `Undefined` |
//! | anything else  | wait in the slot's queue  | leave the queue                     |

use std::cell::RefCell;
use std::collections::VecDeque;

use ahash::AHashMap;
use rivulet_core::{Document, NodeId};

use crate::droplet::Droplet;
use crate::error::Result;
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::Reference;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::value::{Signal, Value};
use crate::visitor::Opcode;

#[derive(Clone)]
struct Link {
    token: String,
    droplet: Droplet,
    value: String,
    signal: Signal,
}

#[derive(Default)]
struct Links(RefCell<Vec<Link>>);

impl Links {
    fn get(&self, token: &str) -> Option<Link> {
        self.0.borrow().iter().find(|l| l.token == token).cloned()
    }

    fn remove_where(&self, mut f: impl FnMut(&Link) -> bool) -> Vec<Link> {
        let mut links = self.0.borrow_mut();
        let (removed, kept): (Vec<Link>, Vec<Link>) = links.drain(..).partition(|l| f(l));
        *links = kept;
        removed
    }
}

/// Elements waiting for a single-element slot, keyed by
/// `(controller, value)` on the droplet's root.
#[derive(Default)]
struct Waiters(RefCell<AHashMap<(String, String), VecDeque<NodeId>>>);

fn waiters(document: &Document, link: &Link) -> std::rc::Rc<Waiters> {
    document.ext_or_insert_with(link.droplet.root(), Waiters::default)
}

fn key(link: &Link) -> (String, String) {
    (link.droplet.name().to_owned(), link.value.clone())
}

fn connect(document: &Document, link: &Link, element: NodeId) {
    let current = link.signal.get();
    match current {
        Value::Elements(_) => link.signal.update(|value| {
            if let Value::Elements(list) = value {
                list.push(element);
            }
        }),
        Value::Undefined => link.signal.set(Value::Element(element)),
        _ => waiters(document, link)
            .0
            .borrow_mut()
            .entry(key(link))
            .or_default()
            .push_back(element),
    }
}

fn disconnect(document: &Document, link: &Link, element: NodeId) {
    let current = link.signal.get();
    match current {
        Value::Elements(list) => {
            if list.contains(&element) {
                link.signal.update(|value| {
                    if let Value::Elements(list) = value {
                        list.retain(|e| *e != element);
                    }
                });
            }
        }
        Value::Element(holder) if holder == element => {
            let next = waiters(document, link)
                .0
                .borrow_mut()
                .get_mut(&key(link))
                .and_then(VecDeque::pop_front);
            link.signal.set(next.map_or(Value::Undefined, Value::Element));
        }
        _ => {
            if let Some(queue) = waiters(document, link).0.borrow_mut().get_mut(&key(link)) {
                queue.retain(|e| *e != element);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Alias;

impl Worker for Alias {
    fn name(&self) -> &str {
        "alias"
    }

    fn priority(&self) -> i32 {
        2
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let tokens = instruction.tokens();
        if tokens.is_empty() {
            return self.unmount(runtime, instruction, scope);
        }
        let document = runtime.document();
        let root = scope.root();
        let links = document.ext_or_insert_with(root, Links::default);

        for link in links.remove_where(|l| !tokens.contains(&l.token.as_str())) {
            disconnect(document, &link, root);
        }

        let parent = scope.parent(document);
        for token in tokens {
            let reference = Reference::parse(token)?;
            let resolved = parent
                .as_ref()
                .and_then(|p| reference.droplet(document, p));
            if let Some(existing) = links.get(token) {
                if resolved.as_ref().is_some_and(|d| d.ptr_eq(&existing.droplet)) {
                    continue;
                }
                links.remove_where(|l| l.token == token);
                disconnect(document, &existing, root);
            }
            let Some(droplet) = resolved else {
                continue;
            };
            let link = Link {
                token: token.to_owned(),
                signal: reference.signal(&droplet)?,
                droplet,
                value: reference.value.to_owned(),
            };
            connect(document, &link, root);
            links.0.borrow_mut().push(link);
        }
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let document = runtime.document();
        let root = scope.root();
        if let Some(links) = document.ext::<Links>(root) {
            for link in links.remove_where(|_| true) {
                disconnect(document, &link, root);
            }
        }
        Ok(Flow::Continue)
    }
}
