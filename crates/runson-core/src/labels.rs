//! Runner-label extraction from workflow text.
//!
//! Workflows are scanned line by line with a small state machine over
//! indentation instead of a YAML parser:
//!
//! * `Outside` until a `jobs:` key is seen,
//! * `InJobs` between job keys,
//! * `InJob` inside one job's body,
//! * `InRunsOnBlock` while reading a `- item` list under an empty `runs-on:`.
//!
//! A line leaves a block once its indentation drops to or below the column of
//! the key that opened it. Blank and comment-only lines never close a block.
//! `runs-on:` is only honoured as a direct child of a job, so text inside
//! script bodies is never mistaken for a label.

use std::collections::BTreeSet;

const JOBS_KEY: &str = "jobs:";
const RUNS_ON_KEY: &str = "runs-on:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InJobs {
        jobs: usize,
        job_key: Option<usize>,
    },
    InJob {
        jobs: usize,
        job_key: usize,
        body: Option<usize>,
        seen_runs_on: bool,
    },
    InRunsOnBlock {
        jobs: usize,
        job_key: usize,
        body: usize,
        runs_on: usize,
    },
}

/// Collect every runner label declared by any job in `content`.
pub fn extract_labels(content: &str) -> BTreeSet<String> {
    let mut labels = BTreeSet::new();
    let mut state = State::Outside;

    for raw in content.lines() {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();

        // A line may close several blocks at once, so re-dispatch until it
        // is consumed by the state it lands in.
        loop {
            match step(state, indent, text, &mut labels) {
                Step::Consumed(next) => {
                    state = next;
                    break;
                }
                Step::Reprocess(next) => state = next,
            }
        }
    }
    labels
}

enum Step {
    Consumed(State),
    Reprocess(State),
}

fn step(state: State, indent: usize, text: &str, labels: &mut BTreeSet<String>) -> Step {
    match state {
        State::Outside => {
            if strip_comment(text) == JOBS_KEY {
                Step::Consumed(State::InJobs {
                    jobs: indent,
                    job_key: None,
                })
            } else {
                Step::Consumed(State::Outside)
            }
        }

        State::InJobs { jobs, job_key } => {
            if indent <= jobs {
                return Step::Reprocess(State::Outside);
            }
            let job_key = job_key.unwrap_or(indent);
            if indent == job_key {
                Step::Consumed(State::InJob {
                    jobs,
                    job_key,
                    body: None,
                    seen_runs_on: false,
                })
            } else {
                Step::Consumed(State::InJobs {
                    jobs,
                    job_key: Some(job_key),
                })
            }
        }

        State::InJob {
            jobs,
            job_key,
            body,
            seen_runs_on,
        } => {
            if indent <= jobs {
                return Step::Reprocess(State::Outside);
            }
            if indent <= job_key {
                return Step::Reprocess(State::InJobs {
                    jobs,
                    job_key: Some(job_key),
                });
            }
            let body = body.unwrap_or(indent);
            let same = State::InJob {
                jobs,
                job_key,
                body: Some(body),
                seen_runs_on,
            };
            if seen_runs_on || indent != body {
                return Step::Consumed(same);
            }
            let Some(value) = text.strip_prefix(RUNS_ON_KEY) else {
                return Step::Consumed(same);
            };

            let value = strip_comment(value);
            if value.is_empty() {
                return Step::Consumed(State::InRunsOnBlock {
                    jobs,
                    job_key,
                    body,
                    runs_on: indent,
                });
            }
            if let Some(list) = value.strip_prefix('[') {
                let list = list.strip_suffix(']').unwrap_or(list);
                labels.extend(
                    list.split(',')
                        .map(unquote)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string),
                );
            } else {
                let label = unquote(value);
                if !label.is_empty() {
                    labels.insert(label.to_string());
                }
            }
            Step::Consumed(State::InJob {
                jobs,
                job_key,
                body: Some(body),
                seen_runs_on: true,
            })
        }

        State::InRunsOnBlock {
            jobs,
            job_key,
            body,
            runs_on,
        } => {
            if indent <= runs_on {
                return Step::Reprocess(State::InJob {
                    jobs,
                    job_key,
                    body: Some(body),
                    seen_runs_on: true,
                });
            }
            if let Some(item) = text.strip_prefix('-') {
                let item = unquote(strip_comment(item));
                if !item.is_empty() {
                    labels.insert(item.to_string());
                }
            }
            Step::Consumed(state)
        }
    }
}

/// Drop a trailing `# comment` that is outside quotes and preceded by
/// whitespace (or starts the value).
fn strip_comment(value: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev_is_space = true;
    for (idx, c) in value.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && prev_is_space => return value[..idx].trim(),
            None => {}
        }
        prev_is_space = c.is_whitespace();
    }
    value.trim()
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for q in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
        {
            return inner.trim();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_and_jobless_documents_have_no_labels() {
        assert!(extract_labels("").is_empty());
        assert!(extract_labels("name: ci\non: push\nenv:\n  runs-on: nope\n").is_empty());
    }

    #[test]
    fn single_scalar_label() {
        assert_eq!(
            extract_labels("jobs:\n  build:\n    runs-on: puzl-cloud\n"),
            set(&["puzl-cloud"])
        );
    }

    #[test]
    fn single_value_with_comment_and_quotes() {
        let content = "jobs:\n  build:\n    runs-on: \"ubuntu-latest\" # pinned later\n";
        assert_eq!(extract_labels(content), set(&["ubuntu-latest"]));
    }

    #[test]
    fn inline_list_with_comment() {
        let content = "jobs:\n  build:\n    runs-on: [ubuntu-20.04, self-hosted] # comment\n";
        assert_eq!(extract_labels(content), set(&["ubuntu-20.04", "self-hosted"]));
    }

    #[test]
    fn inline_list_strips_quotes() {
        let content = "jobs:\n  build:\n    runs-on: ['self-hosted', \"linux\", x64]\n";
        assert_eq!(extract_labels(content), set(&["self-hosted", "linux", "x64"]));
    }

    #[test]
    fn multiline_list_with_comments_and_blank_lines() {
        let content = "\
jobs:
  build:
    runs-on:
      # primary pool
      - self-hosted   # always

      - 'gpu'
      - linux
    steps:
      - run: make
";
        assert_eq!(extract_labels(content), set(&["self-hosted", "gpu", "linux"]));
    }

    #[test]
    fn templated_expression_is_kept_verbatim() {
        let content = "jobs:\n  build:\n    runs-on: ${{ matrix.os }}\n";
        assert_eq!(extract_labels(content), set(&["${{ matrix.os }}"]));
    }

    #[test]
    fn folded_if_block_and_blank_lines_do_not_end_the_job() {
        let content = "\
on: push
jobs:
  deploy:
    if: >
      github.event_name == 'push' &&
      github.ref == 'refs/heads/main'

    runs-on: puzl-ubuntu-latest
    steps:
      - uses: actions/checkout@v4
";
        assert_eq!(extract_labels(content), set(&["puzl-ubuntu-latest"]));
    }

    #[test]
    fn labels_from_every_job_are_merged() {
        let content = "\
jobs:
  lint:
    runs-on: ubuntu-latest
  test:
    needs: lint
    runs-on: [self-hosted, ubuntu-latest]
  release:
    runs-on:
      - macos-14
";
        assert_eq!(
            extract_labels(content),
            set(&["ubuntu-latest", "self-hosted", "macos-14"])
        );
    }

    #[test]
    fn runs_on_inside_script_body_is_ignored() {
        let content = "\
jobs:
  build:
    runs-on: real-runner
    steps:
      - name: print
        run: |
          echo \"runs-on: fake-runner\"
          cat <<EOF
          runs-on: another-fake
          EOF
  check:
    steps:
      - run: echo hi
    runs-on: second-runner
";
        assert_eq!(extract_labels(content), set(&["real-runner", "second-runner"]));
    }

    #[test]
    fn stress_workflow_with_long_script() {
        let content = "\
name: stress
on:
  workflow_dispatch:
    inputs:
      runs-on:
        description: not a job key
jobs:
  stress:
    name: stress-ng
    timeout-minutes: 30
    runs-on: puzl-ubuntu-24.04
    steps:
      - uses: actions/checkout@v4
      - name: Install
        run: sudo apt-get install -y stress-ng
      - name: Stress
        run: |
          stress-ng --cpu 4 --io 2 --vm 1 --vm-bytes 1G --timeout 60s
          stress-ng --matrix 0 --tz -t 60
env:
  runs-on: not-a-label
";
        assert_eq!(extract_labels(content), set(&["puzl-ubuntu-24.04"]));
    }

    #[test]
    fn only_first_runs_on_per_job_counts() {
        let content = "jobs:\n  a:\n    runs-on: one\n    runs-on: two\n";
        assert_eq!(extract_labels(content), set(&["one"]));
    }

    #[test]
    fn comment_helpers() {
        assert_eq!(strip_comment(" value # note"), "value");
        assert_eq!(strip_comment("\"a # b\" # c"), "\"a # b\"");
        assert_eq!(strip_comment("a#b"), "a#b");
        assert_eq!(strip_comment("# all comment"), "");
        assert_eq!(unquote(" 'x' "), "x");
        assert_eq!(unquote("\"y\""), "y");
        assert_eq!(unquote("'z\""), "'z\"");
    }
}
