//! Small graph and iteration helpers shared by both generator pipelines.

/// Strongly connected components of a directed graph over the node indices
/// `0..count`, computed with an iterative Tarjan walk.
///
/// Components are returned children first: every component appears after all
/// components it has edges into. Callers that need a topological order of the
/// condensation therefore process the list front to back to see successors before
/// predecessors, or reverse it for the opposite direction.
pub fn strongly_connected<F>(count: usize, mut successors: F) -> Vec<Vec<usize>>
where
    F: FnMut(usize) -> Vec<usize>,
{
    const UNVISITED: usize = usize::MAX;

    struct Frame {
        node: usize,
        edges: Vec<usize>,
        next_edge: usize,
    }

    let mut index: Vec<usize> = vec![UNVISITED; count];
    let mut lowlink: Vec<usize> = vec![0; count];
    let mut onstack: Vec<bool> = vec![false; count];
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs: Vec<Vec<usize>> = Vec::new();
    let mut counter: usize = 0;

    for root in 0..count {
        if index[root] != UNVISITED {
            continue;
        }
        let mut frames: Vec<Frame> = Vec::new();
        index[root] = counter;
        lowlink[root] = counter;
        counter += 1;
        stack.push(root);
        onstack[root] = true;
        frames.push(Frame {
            node: root,
            edges: successors(root),
            next_edge: 0,
        });

        while let Some(frame) = frames.last_mut() {
            let node = frame.node;
            if frame.next_edge < frame.edges.len() {
                let target = frame.edges[frame.next_edge];
                frame.next_edge += 1;
                if index[target] == UNVISITED {
                    index[target] = counter;
                    lowlink[target] = counter;
                    counter += 1;
                    stack.push(target);
                    onstack[target] = true;
                    frames.push(Frame {
                        node: target,
                        edges: successors(target),
                        next_edge: 0,
                    });
                } else if onstack[target] {
                    lowlink[node] = lowlink[node].min(index[target]);
                }
            } else {
                if lowlink[node] == index[node] {
                    let mut scc = Vec::new();
                    loop {
                        let member = stack.pop().expect("INTERNAL ERROR: scc stack underflow");
                        onstack[member] = false;
                        scc.push(member);
                        if member == node {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
                frames.pop();
                if let Some(parent) = frames.last() {
                    let parent_node = parent.node;
                    lowlink[parent_node] = lowlink[parent_node].min(lowlink[node]);
                }
            }
        }
    }

    sccs
}

/// Split an iterator into runs of at most `max_len` items, used to lay emitted tables
/// out over several lines.
pub fn chunked<T>(items: impl IntoIterator<Item = T>, max_len: usize) -> Vec<Vec<T>> {
    let mut out: Vec<Vec<T>> = Vec::new();
    for item in items {
        match out.last_mut() {
            Some(chunk) if chunk.len() < max_len => chunk.push(item),
            _ => out.push(vec![item]),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scc_orders_children_first() {
        // 0 -> 1 -> 2, 2 -> 1 (cycle), 0 -> 3
        let edges = vec![vec![1, 3], vec![2], vec![1], vec![]];
        let sccs = strongly_connected(4, |n| edges[n].clone());

        let position = |node: usize| sccs.iter().position(|scc| scc.contains(&node)).unwrap();
        assert_eq!(position(1), position(2));
        assert!(position(1) < position(0));
        assert!(position(3) < position(0));
        assert_eq!(sccs.iter().map(|s| s.len()).sum::<usize>(), 4);
    }

    #[test]
    fn scc_handles_self_loop() {
        let sccs = strongly_connected(2, |n| if n == 0 { vec![0, 1] } else { vec![] });
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec![1]);
        assert_eq!(sccs[1], vec![0]);
    }

    #[test]
    fn chunked_splits_runs() {
        let chunks = chunked(0..7, 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }
}
